//! Read-only graph exporters: Mermaid, GraphViz dot, and plain text.

use std::fmt::Write;

use crate::edge::DependencyType;
use crate::graph::DependencyGraph;
use crate::plan::ExecutionPlan;

/// Mermaid `graph TD` rendering. Explicit edges are dashed.
pub fn to_mermaid(graph: &DependencyGraph) -> String {
    let mut out = String::from("graph TD\n");
    for node in graph.nodes() {
        let _ = writeln!(out, "    {}[\"{}\"]", ident(node), node);
    }
    for edge in graph.edges() {
        let arrow = match edge.dep_type {
            DependencyType::Explicit => "-.->",
            _ => "-->",
        };
        let _ = writeln!(out, "    {} {} {}", ident(&edge.from), arrow, ident(&edge.to));
    }
    out
}

/// GraphViz dot rendering, edges labeled with their dependency type.
pub fn to_graphviz(graph: &DependencyGraph) -> String {
    let mut out = String::from("digraph pipeline {\n    rankdir=LR;\n    node [shape=box];\n");
    for node in graph.nodes() {
        let _ = writeln!(out, "    \"{}\";", node);
    }
    for edge in graph.edges() {
        let style = match edge.dep_type {
            DependencyType::Explicit => " style=dashed",
            _ => "",
        };
        let _ = writeln!(
            out,
            "    \"{}\" -> \"{}\" [label=\"{}\"{}];",
            edge.from,
            edge.to,
            label(edge.dep_type),
            style
        );
    }
    out.push_str("}\n");
    out
}

/// Aligned text listing: nodes, edges, then the layer plan when provided.
pub fn to_text(graph: &DependencyGraph, plan: Option<&ExecutionPlan>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "nodes: {}  edges: {}",
        graph.node_count(),
        graph.edge_count()
    );
    for edge in graph.edges() {
        let _ = writeln!(
            out,
            "  {} -> {}  [{}]",
            edge.from,
            edge.to,
            label(edge.dep_type)
        );
    }
    if let Some(plan) = plan {
        let _ = writeln!(
            out,
            "plan: {} layers, max parallelism {}",
            plan.depth(),
            plan.max_parallelism()
        );
        for layer in &plan.layers {
            let _ = writeln!(out, "  layer {}: {}", layer.index, layer.nodes.join(", "));
        }
        if !plan.critical_path.is_empty() {
            let _ = writeln!(out, "critical path: {}", plan.critical_path.join(" -> "));
        }
    }
    out
}

fn label(dep_type: DependencyType) -> &'static str {
    match dep_type {
        DependencyType::Data => "data",
        DependencyType::Explicit => "explicit",
        DependencyType::Resource => "resource",
        DependencyType::Temporal => "temporal",
    }
}

/// Mermaid identifiers cannot contain dashes or dots.
fn ident(name: &str) -> String {
    name.replace(['-', '.'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::DependencyEdge;

    fn chain() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        g.add_edge(DependencyEdge::new("load", "clean", DependencyType::Data));
        g.add_edge(DependencyEdge::new("clean", "report", DependencyType::Explicit));
        g
    }

    #[test]
    fn mermaid_contains_all_edges() {
        let rendered = to_mermaid(&chain());
        assert!(rendered.starts_with("graph TD"));
        assert!(rendered.contains("load --> clean"));
        assert!(rendered.contains("clean -.-> report"));
    }

    #[test]
    fn graphviz_is_well_formed() {
        let rendered = to_graphviz(&chain());
        assert!(rendered.starts_with("digraph pipeline {"));
        assert!(rendered.trim_end().ends_with('}'));
        assert!(rendered.contains("\"load\" -> \"clean\" [label=\"data\"]"));
        assert!(rendered.contains("style=dashed"));
    }

    #[test]
    fn text_includes_plan_when_given() {
        let g = chain();
        let plan = g.build_execution_plan().unwrap();
        let rendered = to_text(&g, Some(&plan));
        assert!(rendered.contains("nodes: 3"));
        assert!(rendered.contains("layer 0: load"));
        assert!(rendered.contains("critical path: load -> clean -> report"));
    }
}
