use std::collections::HashMap;

use crate::error::RoutingError;

/// One segment of a registered route's type-path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// An exact `namespace` or `type` token.
    Exact(String),
    /// Matches any action verb at this position (`/{name}/{verb}`).
    ActionWildcard,
}

#[derive(Default)]
struct Node {
    exact: HashMap<String, Node>,
    wildcard: Option<Box<Node>>,
    handler: Option<String>,
}

/// Maps `(method, plane-kind, type-path)` to a handler key, per §4.3.
///
/// Type-paths alternate `namespace`/`type` tokens, e.g.
/// `["Applications.Core", "environments"]`, optionally followed by an
/// action-verb segment matched either exactly or via [`Segment::ActionWildcard`].
/// Lookup prefers an exact match over a wildcard at every level — "more
/// specific path wins; exact match beats wildcard" (§4.3).
#[derive(Default)]
pub struct RouteTrie {
    roots: HashMap<(String, String), Node>,
}

impl RouteTrie {
    pub fn new() -> Self {
        RouteTrie::default()
    }

    pub fn register(
        &mut self,
        method: &str,
        plane_kind: &str,
        path: &[Segment],
        handler: impl Into<String>,
    ) -> Result<(), RoutingError> {
        let key = (method.to_ascii_uppercase(), plane_kind.to_ascii_lowercase());
        let mut node = self.roots.entry(key).or_default();
        for seg in path {
            node = match seg {
                Segment::Exact(s) => node.exact.entry(s.to_ascii_lowercase()).or_default(),
                Segment::ActionWildcard => {
                    node.wildcard.get_or_insert_with(|| Box::new(Node::default()))
                }
            };
        }
        if node.handler.is_some() {
            return Err(RoutingError::Conflict {
                method: method.to_string(),
                plane_kind: plane_kind.to_string(),
                type_path: render_path(path),
            });
        }
        node.handler = Some(handler.into());
        Ok(())
    }

    /// Look up the handler for a concrete request path, e.g.
    /// `["Applications.Core", "environments", "stop"]`.
    pub fn lookup(
        &self,
        method: &str,
        plane_kind: &str,
        concrete_path: &[&str],
    ) -> Result<&str, RoutingError> {
        let key = (method.to_ascii_uppercase(), plane_kind.to_ascii_lowercase());
        let root = self.roots.get(&key).ok_or_else(|| RoutingError::NoMatch {
            method: method.to_string(),
            plane_kind: plane_kind.to_string(),
            type_path: concrete_path.join("/"),
        })?;

        walk(root, concrete_path).ok_or_else(|| RoutingError::NoMatch {
            method: method.to_string(),
            plane_kind: plane_kind.to_string(),
            type_path: concrete_path.join("/"),
        })
    }
}

/// Depth-first walk preferring the exact child; falls back to the wildcard
/// child only when no exact continuation leads to a registered handler.
fn walk<'a>(node: &'a Node, remaining: &[&str]) -> Option<&'a str> {
    if remaining.is_empty() {
        return node.handler.as_deref();
    }
    let (head, tail) = (remaining[0].to_ascii_lowercase(), &remaining[1..]);

    if let Some(child) = node.exact.get(&head) {
        if let Some(h) = walk(child, tail) {
            return Some(h);
        }
    }
    if let Some(child) = &node.wildcard {
        if let Some(h) = walk(child, tail) {
            return Some(h);
        }
    }
    None
}

fn render_path(path: &[Segment]) -> String {
    path.iter()
        .map(|s| match s {
            Segment::Exact(s) => s.clone(),
            Segment::ActionWildcard => "{action}".to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(s: &str) -> Segment {
        Segment::Exact(s.to_string())
    }

    #[test]
    fn exact_match_resolves() {
        let mut trie = RouteTrie::new();
        trie.register(
            "PUT",
            "radius",
            &[exact("Applications.Core"), exact("environments")],
            "put_environment",
        )
        .unwrap();

        let h = trie
            .lookup("put", "radius", &["Applications.Core", "environments"])
            .unwrap();
        assert_eq!(h, "put_environment");
    }

    #[test]
    fn method_and_plane_kind_are_case_insensitive() {
        let mut trie = RouteTrie::new();
        trie.register("GET", "Radius", &[exact("Applications.Core"), exact("environments")], "get_environment")
            .unwrap();
        assert!(trie.lookup("get", "RADIUS", &["applications.core", "Environments"]).is_ok());
    }

    #[test]
    fn action_wildcard_matches_any_verb() {
        let mut trie = RouteTrie::new();
        trie.register(
            "POST",
            "radius",
            &[exact("Applications.Core"), exact("environments"), Segment::ActionWildcard],
            "post_environment_action",
        )
        .unwrap();

        assert!(trie.lookup("post", "radius", &["Applications.Core", "environments", "stop"]).is_ok());
        assert!(trie.lookup("post", "radius", &["Applications.Core", "environments", "listSecrets"]).is_ok());
    }

    #[test]
    fn exact_action_beats_wildcard() {
        let mut trie = RouteTrie::new();
        trie.register(
            "POST",
            "radius",
            &[exact("Applications.Core"), exact("environments"), Segment::ActionWildcard],
            "generic_action",
        )
        .unwrap();
        trie.register(
            "POST",
            "radius",
            &[exact("Applications.Core"), exact("environments"), exact("stop")],
            "stop_environment",
        )
        .unwrap();

        let h = trie.lookup("post", "radius", &["Applications.Core", "environments", "stop"]).unwrap();
        assert_eq!(h, "stop_environment");

        let h = trie.lookup("post", "radius", &["Applications.Core", "environments", "restart"]).unwrap();
        assert_eq!(h, "generic_action");
    }

    #[test]
    fn unregistered_route_is_no_match() {
        let trie = RouteTrie::new();
        let err = trie.lookup("put", "radius", &["Applications.Core", "environments"]);
        assert!(matches!(err, Err(RoutingError::NoMatch { .. })));
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let mut trie = RouteTrie::new();
        trie.register("PUT", "radius", &[exact("Applications.Core"), exact("environments")], "a")
            .unwrap();
        let err = trie.register("PUT", "radius", &[exact("Applications.Core"), exact("environments")], "b");
        assert!(matches!(err, Err(RoutingError::Conflict { .. })));
    }

    #[test]
    fn different_planes_do_not_collide() {
        let mut trie = RouteTrie::new();
        trie.register("GET", "radius", &[exact("Applications.Core"), exact("environments")], "local")
            .unwrap();
        trie.register("GET", "aws", &[exact("AWS.S3"), exact("buckets")], "proxy")
            .unwrap();
        assert_eq!(trie.lookup("get", "radius", &["Applications.Core", "environments"]).unwrap(), "local");
        assert_eq!(trie.lookup("get", "aws", &["AWS.S3", "buckets"]).unwrap(), "proxy");
    }
}
