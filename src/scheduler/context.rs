//! Builder context resolution (§4.7): either the user supplied
//! `--context-file`, or a knowledge-graph-derived neighbor list, or — when
//! graph RAG itself is unreachable — a context block synthesized from the
//! service's own architect-produced metadata (domain, stack, owned data,
//! events, dependencies) so a builder is never started with nothing at all.

use crate::collaborators::graph_rag::GraphRag;
use crate::models::{EventDirection, ServiceInfo};

/// Resolve the context block for `service`: the explicit `--context-file`
/// content if given, otherwise a graph-RAG-derived neighbor list, otherwise
/// a synthesized summary of the service's own known metadata.
pub async fn resolve_context(
    graph_rag: &GraphRag,
    service: &ServiceInfo,
    explicit_context: Option<&str>,
) -> Option<String> {
    if let Some(explicit) = explicit_context {
        return Some(explicit.to_string());
    }

    match graph_rag.neighbors(&service.name).await {
        Some(neighbors) if !neighbors.is_empty() => {
            Some(format_neighbor_block(&service.name, &neighbors))
        }
        _ => Some(synthesize_context(service)),
    }
}

fn format_neighbor_block(service: &str, neighbors: &[String]) -> String {
    let mut block = format!("# Knowledge graph context for {service}\n\n");
    block.push_str("Related services and their current contracts:\n");
    for neighbor in neighbors {
        block.push_str(&format!("- {neighbor}\n"));
    }
    block
}

/// Built when graph RAG can't be reached: everything a builder needs to
/// know about its own service boundary, drawn straight from the architect's
/// decomposition rather than a live knowledge graph.
fn synthesize_context(service: &ServiceInfo) -> String {
    let mut block = format!("# Service context for {}\n\n", service.name);
    block.push_str(&format!("Domain: {}\n", service.description));
    block.push_str(&format!(
        "Stack: {} / {} / {}\n",
        service.stack.language, service.stack.framework, service.stack.database
    ));

    if !service.owns_data.is_empty() {
        block.push_str("\nOwned entities:\n");
        for entity in &service.owns_data {
            block.push_str(&format!("- {entity}\n"));
        }
    }

    if !service.depends_on.is_empty() {
        block.push_str("\nDepends on:\n");
        for dependency in &service.depends_on {
            block.push_str(&format!("- {dependency}\n"));
        }
    }

    if let Some(events) = &service.events {
        if !events.is_empty() {
            block.push_str("\nEvents:\n");
            for event in events {
                let direction = match event.direction {
                    EventDirection::Publishes => "publishes",
                    EventDirection::Subscribes => "subscribes to",
                };
                block.push_str(&format!("- {direction} {}\n", event.name));
            }
        }
    }

    block
}

</content>
