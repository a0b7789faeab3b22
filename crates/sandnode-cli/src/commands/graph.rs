use super::{open_fs, print_json, report};
use miette::Result;
use sandnode_core::{Config, NodeId, PackageGraph, PackageNode};
use serde::Serialize;
use std::collections::BTreeMap;

/// Tree output stops descending past this depth.
const MAX_TREE_DEPTH: usize = 25;

#[derive(Debug, Serialize)]
struct GraphOutput<'a> {
    root: String,
    packages: Vec<PackageOutput<'a>>,
}

#[derive(Debug, Serialize)]
struct PackageOutput<'a> {
    address: &'a str,
    name: &'a str,
    version: Option<&'a str>,
    dev: bool,
    optional: bool,
    /// Dependency name to the address of the copy it resolves to.
    dependencies: BTreeMap<&'a str, &'a str>,
}

/// Print the package graph of the project at `config.cwd`.
pub fn run(config: &Config, format: &str) -> Result<()> {
    let fs = open_fs(&config.cwd)?;
    let (graph, _) = PackageGraph::load(fs.as_ref(), "/").map_err(report)?;

    if config.json_logs {
        return print_json(&graph_output(&graph));
    }

    let root = graph.node(graph.root());
    if graph.len() == 1 {
        println!("{}", root.id());
        println!("(no packages found)");
        return Ok(());
    }
    match format {
        "list" => print_list(&graph),
        _ => {
            println!("{}", root.id());
            print_tree(&graph, graph.root(), "", &mut vec![graph.root()]);
        }
    }
    Ok(())
}

fn graph_output(graph: &PackageGraph) -> GraphOutput<'_> {
    let packages = graph
        .addresses()
        .into_values()
        .map(|id| {
            let node = graph.node(id);
            PackageOutput {
                address: &node.address,
                name: &node.name,
                version: node.version.as_deref(),
                dev: node.dev,
                optional: node.optional,
                dependencies: node
                    .dependencies
                    .iter()
                    .map(|(name, dep)| (name.as_str(), graph.node(*dep).address.as_str()))
                    .collect(),
            }
        })
        .collect();
    GraphOutput {
        root: graph.node(graph.root()).id(),
        packages,
    }
}

fn print_list(graph: &PackageGraph) {
    for (address, id) in graph.addresses() {
        println!("{address} {}{}", graph.node(id).id(), flags(graph.node(id)));
    }
}

fn print_tree(graph: &PackageGraph, id: NodeId, prefix: &str, ancestors: &mut Vec<NodeId>) {
    if ancestors.len() >= MAX_TREE_DEPTH {
        return;
    }
    let deps = &graph.node(id).dependencies;
    let len = deps.len();
    for (i, dep) in deps.values().enumerate() {
        let is_last = i + 1 == len;
        let connector = if is_last { "└── " } else { "├── " };
        let next_prefix = if is_last { "    " } else { "│   " };
        let node = graph.node(*dep);

        if ancestors.contains(dep) {
            println!("{prefix}{connector}{} (cycle)", node.id());
            continue;
        }
        println!("{prefix}{connector}{}{}", node.id(), flags(node));

        ancestors.push(*dep);
        print_tree(graph, *dep, &format!("{prefix}{next_prefix}"), ancestors);
        ancestors.pop();
    }
}

fn flags(node: &PackageNode) -> &'static str {
    match (node.dev, node.optional) {
        (true, true) => " (dev, optional)",
        (true, false) => " (dev)",
        (false, true) => " (optional)",
        (false, false) => "",
    }
}
