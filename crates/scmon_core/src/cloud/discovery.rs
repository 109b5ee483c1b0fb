use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use super::EndpointData;

#[derive(Debug, Deserialize)]
struct VersionEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(default)]
    rel: String,
    #[serde(default)]
    href: String,
}

impl VersionEntry {
    fn self_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "self" && !l.href.is_empty())
            .map(|l| l.href.as_str())
    }

    fn is_current(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "current" | "stable" | "supported"
        )
    }

    fn numeric_id(&self) -> Vec<u32> {
        self.id
            .trim_start_matches(['v', 'V'])
            .split('.')
            .map_while(|part| part.parse().ok())
            .collect()
    }
}

/// Reads a version document (`version`, `versions` or `versions.values`) and
/// derives the endpoint data for `catalog_url`.
pub fn parse_version_document(body: &Value, catalog_url: &str) -> EndpointData {
    let chosen = pick_version(collect_versions(body));
    let service_url = chosen.as_ref().and_then(VersionEntry::self_link).map(|href| {
        let href = href.trim_end_matches('/');
        // A catalog URL already scoped below the version root (e.g. carrying a
        // project id) is kept as is.
        let catalog = catalog_url.trim_end_matches('/');
        let scoped = catalog
            .strip_prefix(href)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
        if scoped {
            catalog_url.to_owned()
        } else {
            href.to_owned()
        }
    });
    EndpointData {
        service_url,
        catalog_url: Some(catalog_url.to_owned()),
    }
}

/// Whether `body` lists at least one version entry.
pub fn has_version_entries(body: &Value) -> bool {
    !collect_versions(body).is_empty()
}

/// URLs to fetch a version document from, in order: the catalog URL, the
/// catalog URL cut before the segment carrying `project_id`, the host root.
pub fn discovery_candidates(catalog_url: &str, project_id: &str) -> Vec<String> {
    let mut candidates = vec![catalog_url.to_owned()];
    let Ok(url) = Url::parse(catalog_url) else {
        return candidates;
    };
    let segments: Vec<&str> = url
        .path_segments()
        .map(|parts| parts.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    if !project_id.is_empty() {
        if let Some(pos) = segments.iter().position(|s| s.contains(project_id)) {
            let mut unscoped = url.clone();
            unscoped.set_path(&segments[..pos].join("/"));
            unscoped.set_query(None);
            push_unique(&mut candidates, unscoped.as_str());
        }
    }
    let mut root = url.clone();
    root.set_path("/");
    root.set_query(None);
    push_unique(&mut candidates, root.as_str());
    candidates
}

fn push_unique(candidates: &mut Vec<String>, url: &str) {
    let key = url.trim_end_matches('/');
    if !candidates.iter().any(|c| c.trim_end_matches('/') == key) {
        candidates.push(url.to_owned());
    }
}

fn collect_versions(body: &Value) -> Vec<VersionEntry> {
    if let Some(single) = body.get("version") {
        return serde_json::from_value(single.clone()).into_iter().collect();
    }
    let list = match body.get("versions") {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Object(map)) => match map.get("values") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    list.into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect()
}

fn pick_version(mut versions: Vec<VersionEntry>) -> Option<VersionEntry> {
    if versions.iter().any(VersionEntry::is_current) {
        versions.retain(VersionEntry::is_current);
    }
    versions
        .into_iter()
        .filter(|v| v.self_link().is_some())
        .max_by(|a, b| a.numeric_id().cmp(&b.numeric_id()))
}
