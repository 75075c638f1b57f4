//! Structural node synthesis.
//!
//! After pass 1 the graph knows about files and code symbols; this step
//! adds the skeleton that ties them together: one `Repository` node, one
//! `Module` node per discovered module, external dependency nodes deduped
//! by coordinate, and the ownership/dependency edges between them.

use std::collections::{BTreeMap, HashSet};

use serde_json::json;

use repograph_model::{
    dependency_qualified_name, entity_id, kinds, module_qualified_name, qualified_name,
    rel_types, FileInfo, InstanceIdAllocator, Node, Relationship, RepositoryContext,
};

use crate::build::ProjectStructure;

/// Output of the synthesis step
#[derive(Debug, Default)]
pub struct StructuralGraph {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

/// Synthesize repository/module/dependency structure.
///
/// `pass1_nodes` is consulted for `DEFINED_IN_MODULE` edges: every node
/// whose parent is a module-owned `File` node is treated as a top-level
/// definition of that module.
pub fn synthesize(
    ctx: &RepositoryContext,
    structure: Option<&ProjectStructure>,
    files: &[FileInfo],
    pass1_nodes: &[Node],
    ids: &InstanceIdAllocator,
) -> StructuralGraph {
    let mut graph = StructuralGraph::default();

    let repo_entity = entity_id(kinds::REPOSITORY, &ctx.repository_id);
    let mut repo_node = Node::builder(kinds::REPOSITORY, &ctx.repository_name)
        .entity_id(&repo_entity)
        .instance_id(ids.next(kinds::REPOSITORY, &ctx.repository_name))
        .property("repositoryId", json!(ctx.repository_id))
        .property(
            "rootDirectory",
            json!(ctx.root_directory.to_string_lossy()),
        );
    if let Some(url) = &ctx.repository_url {
        repo_node = repo_node.property("url", json!(url));
    }
    graph.nodes.push(repo_node.build());

    // Every scanned file belongs to the repository
    let mut file_entity_by_path: BTreeMap<&str, (String, Option<&str>)> = BTreeMap::new();
    for file in files {
        let qn = qualified_name(&ctx.repository_id, &file.relative_path, "");
        let file_entity = entity_id(kinds::FILE, &qn);
        graph.relationships.push(Relationship::new(
            rel_types::BELONGS_TO,
            &file_entity,
            &repo_entity,
            ids.next(rel_types::BELONGS_TO, &file.relative_path),
        ));
        file_entity_by_path.insert(
            file.relative_path.as_str(),
            (file_entity, file.module_name.as_deref()),
        );
    }

    let Some(structure) = structure else {
        return graph;
    };

    // Modules and their edges
    let mut module_entity_by_name: BTreeMap<&str, String> = BTreeMap::new();
    for module in &structure.modules {
        let module_entity = entity_id(
            kinds::MODULE,
            &module_qualified_name(&ctx.repository_id, &module.name),
        );
        let mut node = Node::builder(kinds::MODULE, &module.name)
            .entity_id(&module_entity)
            .instance_id(ids.next(kinds::MODULE, &module.name))
            .property("repositoryId", json!(ctx.repository_id))
            .property("relativePath", json!(module.relative_path))
            .property("moduleKind", json!(module.kind.as_str()));
        if let Some(group) = &module.build.group {
            node = node.property("group", json!(group));
        }
        if let Some(version) = &module.build.version {
            node = node.property("version", json!(version));
        }
        graph.nodes.push(node.build());

        graph.relationships.push(Relationship::new(
            rel_types::HAS_MODULE,
            &repo_entity,
            &module_entity,
            ids.next(rel_types::HAS_MODULE, &module.name),
        ));
        module_entity_by_name.insert(module.name.as_str(), module_entity);
    }

    // Module-owned files
    for (path, (file_entity, module_name)) in &file_entity_by_path {
        let Some(module_entity) =
            module_name.and_then(|name| module_entity_by_name.get(name))
        else {
            continue;
        };
        graph.relationships.push(Relationship::new(
            rel_types::CONTAINS_FILE,
            module_entity,
            file_entity,
            ids.next(rel_types::CONTAINS_FILE, path),
        ));
    }

    // Inter-module dependency edges
    for (from, deps) in &structure.module_dependencies {
        let Some(from_entity) = module_entity_by_name.get(from.as_str()) else {
            continue;
        };
        for to in deps {
            let Some(to_entity) = module_entity_by_name.get(to.as_str()) else {
                continue;
            };
            graph.relationships.push(Relationship::new(
                rel_types::DEPENDS_ON_MODULE,
                from_entity,
                to_entity,
                ids.next(rel_types::DEPENDS_ON_MODULE, from),
            ));
        }
    }

    // External dependencies, deduped by group:artifact:version
    let mut seen_coordinates: HashSet<String> = HashSet::new();
    for module in &structure.modules {
        let module_entity = &module_entity_by_name[module.name.as_str()];
        for dep in &module.build.dependencies {
            let coordinate = dep.coordinate();
            let dep_entity = entity_id(
                kinds::EXTERNAL_DEPENDENCY,
                &dependency_qualified_name(
                    &dep.group,
                    &dep.artifact,
                    dep.version.as_deref().unwrap_or("unspecified"),
                ),
            );
            if seen_coordinates.insert(coordinate.clone()) {
                graph.nodes.push(
                    Node::builder(kinds::EXTERNAL_DEPENDENCY, &coordinate)
                        .entity_id(&dep_entity)
                        .instance_id(ids.next(kinds::EXTERNAL_DEPENDENCY, &dep.artifact))
                        .property("group", json!(dep.group))
                        .property("artifact", json!(dep.artifact))
                        .property(
                            "version",
                            json!(dep.version.as_deref().unwrap_or("unspecified")),
                        )
                        .property("isPlatform", json!(dep.is_platform))
                        .build(),
                );
            }
            graph.relationships.push(
                Relationship::new(
                    rel_types::HAS_DEPENDENCY,
                    module_entity,
                    &dep_entity,
                    ids.next(rel_types::HAS_DEPENDENCY, &dep.artifact),
                )
                .with_property("configuration", json!(dep.configuration)),
            );
        }
    }

    // Top-level definitions: nodes parented directly by a module-owned File
    let owned_file_entities: BTreeMap<&str, &str> = file_entity_by_path
        .values()
        .filter_map(|(entity, module)| {
            let module_entity = module.and_then(|m| module_entity_by_name.get(m))?;
            Some((entity.as_str(), module_entity.as_str()))
        })
        .collect();
    for node in pass1_nodes {
        if node.kind == kinds::FILE {
            continue;
        }
        let Some(parent) = node.parent_id.as_deref() else {
            continue;
        };
        let Some(module_entity) = owned_file_entities.get(parent) else {
            continue;
        };
        graph.relationships.push(Relationship::new(
            rel_types::DEFINED_IN_MODULE,
            &node.entity_id,
            *module_entity,
            ids.next(rel_types::DEFINED_IN_MODULE, &node.name),
        ));
    }

    graph
}
