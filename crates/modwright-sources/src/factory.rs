use std::collections::BTreeMap;

use modwright_catalog::{Catalog, SourceDescriptor, SourceKind};

use crate::service::{AggregateSource, ReleaseSource, StaticSource, UpdateService};

type Constructor = fn(&str, &SourceDescriptor, &Catalog) -> UpdateService;

// Closed registry of source kinds. Adding a kind is one line here plus its
// constructor; nothing is discovered at runtime.
const REGISTRY: &[(SourceKind, Constructor)] = &[
    (SourceKind::RepositoryRelease, make_release),
    (SourceKind::AggregateSource, make_aggregate),
    (SourceKind::StaticUrl, make_static),
];

pub fn make(module_name: &str, catalog: &Catalog) -> Option<UpdateService> {
    let descriptor = catalog.descriptor(module_name)?;
    REGISTRY
        .iter()
        .find(|(kind, _)| *kind == descriptor.kind)
        .map(|(_, constructor)| constructor(module_name, descriptor, catalog))
}

fn make_release(module_name: &str, descriptor: &SourceDescriptor, _catalog: &Catalog) -> UpdateService {
    UpdateService::Release(ReleaseSource {
        module_name: module_name.to_string(),
        repository: descriptor.repository.clone(),
        tag_prefix: descriptor.tag_prefix.clone(),
        fetch_latest_from_remote: descriptor.fetch_latest_from_remote,
        no_release: descriptor.no_release,
        default_branch: descriptor.default_branch.clone(),
        is_theme: descriptor.is_theme,
        category: descriptor.category.clone(),
        folders_to_clean: descriptor.folders_to_clean.clone(),
    })
}

fn make_aggregate(
    module_name: &str,
    descriptor: &SourceDescriptor,
    catalog: &Catalog,
) -> UpdateService {
    // The bundle ships as one archive; acting on any member re-stages every
    // catalog entry of this kind.
    let members: BTreeMap<String, String> = catalog
        .members_of_kind(SourceKind::AggregateSource)
        .into_iter()
        .map(|member| (member.to_string(), member.to_string()))
        .collect();

    UpdateService::Aggregate(AggregateSource {
        module_name: module_name.to_string(),
        members,
        download_url: descriptor.download_url.clone(),
        documentation_url: descriptor.documentation_url.clone(),
        category: descriptor.category.clone(),
        folders_to_clean: descriptor.folders_to_clean.clone(),
    })
}

fn make_static(module_name: &str, descriptor: &SourceDescriptor, _catalog: &Catalog) -> UpdateService {
    UpdateService::Static(StaticSource {
        module_name: module_name.to_string(),
        download_url: descriptor.download_url.clone(),
        documentation_url: descriptor.documentation_url.clone(),
        latest_version: descriptor.latest_version.clone(),
        is_theme: descriptor.is_theme,
        category: descriptor.category.clone(),
        folders_to_clean: descriptor.folders_to_clean.clone(),
    })
}
