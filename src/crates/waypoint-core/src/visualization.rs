//! Render a graph topology as a Mermaid or Graphviz DOT diagram
//!
//! Output is deterministic (nodes and edges are emitted in sorted order), so
//! diagrams can be committed and diffed.
//!
//! Loop gates are drawn as diamonds. Their retry back-edge is dotted and
//! labelled with the counter bound; the exit edge is labelled `exit`.

use crate::graph::{Edge, Graph, END, START};

/// Graph visualization format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    /// DOT format for Graphviz
    Dot,
    /// Mermaid diagram format
    Mermaid,
}

/// Visualization options
#[derive(Debug, Clone)]
pub struct VisualizationOptions {
    pub format: VisualizationFormat,
    /// Add node descriptions and timeouts to labels
    pub include_details: bool,
    pub title: Option<String>,
}

impl Default for VisualizationOptions {
    fn default() -> Self {
        Self {
            format: VisualizationFormat::Mermaid,
            include_details: false,
            title: None,
        }
    }
}

impl VisualizationOptions {
    pub fn dot() -> Self {
        Self {
            format: VisualizationFormat::Dot,
            ..Default::default()
        }
    }

    pub fn mermaid() -> Self {
        Self {
            format: VisualizationFormat::Mermaid,
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_details(mut self) -> Self {
        self.include_details = true;
        self
    }
}

/// One drawable arrow
struct Arrow {
    from: String,
    to: String,
    label: Option<String>,
    kind: ArrowKind,
}

#[derive(Clone, Copy, PartialEq)]
enum ArrowKind {
    Direct,
    Branch,
    Retry,
    Exit,
}

fn arrows(graph: &Graph) -> Vec<Arrow> {
    let mut out = Vec::new();

    if let Some(entry) = &graph.entry {
        out.push(Arrow {
            from: START.to_string(),
            to: entry.clone(),
            label: None,
            kind: ArrowKind::Direct,
        });
    }

    let mut sources: Vec<&String> = graph.edges.keys().collect();
    sources.sort();

    for from in sources {
        for edge in &graph.edges[from] {
            match edge {
                Edge::Direct(to) => out.push(Arrow {
                    from: from.clone(),
                    to: to.clone(),
                    label: None,
                    kind: ArrowKind::Direct,
                }),
                Edge::Conditional { branches, .. } => {
                    let mut keys: Vec<&String> = branches.keys().collect();
                    keys.sort();
                    for key in keys {
                        out.push(Arrow {
                            from: from.clone(),
                            to: branches[key].clone(),
                            label: Some(key.clone()),
                            kind: ArrowKind::Branch,
                        });
                    }
                }
                Edge::LoopGate(counter) => {
                    let Some(guard) = graph.loops.iter().find(|l| &l.counter == counter) else {
                        continue;
                    };
                    if let Some(retry) = guard.retry_target() {
                        out.push(Arrow {
                            from: from.clone(),
                            to: retry.to_string(),
                            label: Some(format!("retry {} < {}", guard.counter, guard.max)),
                            kind: ArrowKind::Retry,
                        });
                    }
                    if let Some(exit) = &guard.exit_to {
                        out.push(Arrow {
                            from: from.clone(),
                            to: exit.clone(),
                            label: Some("exit".to_string()),
                            kind: ArrowKind::Exit,
                        });
                    }
                }
            }
        }
    }
    out
}

fn node_label(graph: &Graph, node_id: &str, options: &VisualizationOptions) -> String {
    let Some(spec) = graph.nodes.get(node_id) else {
        return node_id.to_string();
    };
    if !options.include_details {
        return spec.name.clone();
    }
    let mut label = spec.name.clone();
    if let Some(description) = &spec.description {
        label.push('\n');
        label.push_str(description);
    }
    if let Some(timeout) = spec.timeout {
        label.push_str(&format!("\ntimeout: {}ms", timeout.as_millis()));
    }
    label
}

fn sorted_nodes(graph: &Graph) -> Vec<&String> {
    let mut nodes: Vec<&String> = graph.nodes.keys().collect();
    nodes.sort();
    nodes
}

/// Visualize a graph as a string
pub fn visualize(graph: &Graph, options: &VisualizationOptions) -> String {
    match options.format {
        VisualizationFormat::Dot => visualize_dot(graph, options),
        VisualizationFormat::Mermaid => visualize_mermaid(graph, options),
    }
}

fn visualize_dot(graph: &Graph, options: &VisualizationOptions) -> String {
    let mut output = String::new();

    output.push_str("digraph G {\n");
    output.push_str("    rankdir=TB;\n");
    output.push_str("    node [shape=box, style=rounded];\n");

    if let Some(title) = &options.title {
        output.push_str("    labelloc=\"t\";\n");
        output.push_str(&format!("    label=\"{}\";\n", escape_dot(title)));
    }

    output.push_str(&format!("    \"{}\" [shape=circle, style=filled, fillcolor=green];\n", START));
    output.push_str(&format!("    \"{}\" [shape=circle, style=filled, fillcolor=red];\n", END));

    let gates: Vec<&str> = graph.loops.iter().filter_map(|l| l.gate.as_deref()).collect();
    for node_id in sorted_nodes(graph) {
        let shape = if gates.contains(&node_id.as_str()) {
            ", shape=diamond"
        } else {
            ""
        };
        output.push_str(&format!(
            "    \"{}\" [label=\"{}\"{}];\n",
            escape_dot(node_id),
            escape_dot(&node_label(graph, node_id, options)),
            shape
        ));
    }

    for arrow in arrows(graph) {
        let attrs = match (arrow.kind, &arrow.label) {
            (ArrowKind::Branch, Some(label)) => format!(" [label=\"{}\", style=dashed]", escape_dot(label)),
            (ArrowKind::Retry, Some(label)) => {
                format!(" [label=\"{}\", style=dotted, color=blue]", escape_dot(label))
            }
            (_, Some(label)) => format!(" [label=\"{}\"]", escape_dot(label)),
            (_, None) => String::new(),
        };
        output.push_str(&format!(
            "    \"{}\" -> \"{}\"{};\n",
            escape_dot(&arrow.from),
            escape_dot(&arrow.to),
            attrs
        ));
    }

    output.push_str("}\n");
    output
}

fn visualize_mermaid(graph: &Graph, options: &VisualizationOptions) -> String {
    let mut output = String::new();
    output.push_str("graph TD\n");

    if let Some(title) = &options.title {
        output.push_str(&format!("    title[\"{}\"]\n", escape_mermaid(title)));
    }

    output.push_str(&format!("    {}((START))\n", sanitize_id(START)));
    output.push_str(&format!("    {}((END))\n", sanitize_id(END)));

    let gates: Vec<&str> = graph.loops.iter().filter_map(|l| l.gate.as_deref()).collect();
    for node_id in sorted_nodes(graph) {
        let label = escape_mermaid(&node_label(graph, node_id, options));
        if gates.contains(&node_id.as_str()) {
            output.push_str(&format!("    {}{{\"{}\"}}\n", sanitize_id(node_id), label));
        } else {
            output.push_str(&format!("    {}[\"{}\"]\n", sanitize_id(node_id), label));
        }
    }

    for arrow in arrows(graph) {
        let from = sanitize_id(&arrow.from);
        let to = sanitize_id(&arrow.to);
        let line = match (arrow.kind, &arrow.label) {
            (ArrowKind::Branch | ArrowKind::Retry, Some(label)) => {
                format!("    {} -.->|{}| {}\n", from, escape_mermaid(label), to)
            }
            (_, Some(label)) => format!("    {} -->|{}| {}\n", from, escape_mermaid(label), to),
            (_, None) => format!("    {} --> {}\n", from, to),
        };
        output.push_str(&line);
    }

    output.push_str(&format!(
        "    style {} fill:#90EE90,stroke:#228B22,stroke-width:3px\n",
        sanitize_id(START)
    ));
    output.push_str(&format!(
        "    style {} fill:#FFB6C1,stroke:#DC143C,stroke-width:3px\n",
        sanitize_id(END)
    ));
    output
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_mermaid(s: &str) -> String {
    s.replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('|', "&#124;")
        .replace('\n', "<br/>")
}

/// Mermaid ids must be alphanumeric plus underscore
fn sanitize_id(s: &str) -> String {
    s.replace("__", "").replace(['-', '.', ' '], "_")
}
