//! 3D Tiles content service: resolves content URIs against the tileset URL

use crate::streaming::service::ServiceType;
use crate::tiles::Tile;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ogc3DTilesService {
    /// URL or path of the tileset JSON the storage was hydrated from
    base_url: String,
}

impl Ogc3DTilesService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl ServiceType for Ogc3DTilesService {
    fn name(&self) -> &str {
        "3dtiles"
    }

    fn content_url(&self, tile: Tile<'_>) -> Option<String> {
        tile.first_content_uri().map(|uri| resolve_url(&self.base_url, uri))
    }
}

/// Resolve `uri` relative to `base` the way a browser would for the common
/// cases: absolute URLs and `data:` URIs pass through, `/path` is rooted at
/// the base origin, anything else is relative to the base directory.
pub fn resolve_url(base: &str, uri: &str) -> String {
    if uri.contains("://") || uri.starts_with("data:") {
        return uri.to_string();
    }

    let base = base.split(['?', '#']).next().unwrap_or(base);
    let origin_end = base.find("://").map(|scheme_end| {
        let authority_start = scheme_end + 3;
        base[authority_start..]
            .find('/')
            .map_or(base.len(), |i| authority_start + i)
    });

    if let Some(path) = uri.strip_prefix('/') {
        return match origin_end {
            Some(end) => format!("{}/{}", &base[..end], path),
            None => uri.to_string(),
        };
    }

    let origin = &base[..origin_end.unwrap_or(0)];
    let base_path = &base[origin.len()..];
    let directory = match base_path.rfind('/') {
        Some(i) => &base_path[..=i],
        None if !origin.is_empty() => "/",
        None => "",
    };

    let (path, query) = match uri.find(['?', '#']) {
        Some(i) => (&uri[..i], &uri[i..]),
        None => (uri, ""),
    };
    format!("{}{}{}", origin, remove_dot_segments(&format!("{}{}", directory, path)), query)
}

/// Collapse `.` and `..` segments; `..` never climbs above the first segment
fn remove_dot_segments(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            _ => segments.push(segment),
        }
    }

    let mut out = segments.join("/");
    if absolute {
        out.insert(0, '/');
    }
    out
}
