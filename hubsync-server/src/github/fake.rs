//! In-memory Git data API for tests.
//!
//! Serves the handful of endpoints the sync pipeline uses with GitHub's
//! semantics: trees merge into `base_tree`, `sha: null` removes a path, and ref
//! updates must fast-forward.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use super::{ApiBody, ApiResponse, UpstreamApi};
use crate::sync::plan::git_blob_id;
use crate::utils::{Result, SyncError};

#[derive(Debug, Clone)]
struct TreeItem {
    mode: String,
    kind: String,
    sha: String,
}

#[derive(Debug, Clone)]
struct StoredCommit {
    tree: String,
    parents: Vec<String>,
    message: String,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Default)]
struct State {
    blobs: HashMap<String, Vec<u8>>,
    trees: HashMap<String, BTreeMap<String, TreeItem>>,
    commits: HashMap<String, StoredCommit>,
    refs: HashMap<String, String>,
    calls: Vec<RecordedCall>,
    failures: Vec<(String, String, u16)>,
    counter: u64,
}

impl State {
    fn next_id(&mut self, kind: &str) -> String {
        self.counter += 1;
        git_blob_id(format!("{}-{}", kind, self.counter).as_bytes())
    }

    fn store_tree(&mut self, items: BTreeMap<String, TreeItem>) -> String {
        let sha = self.next_id("tree");
        self.trees.insert(sha.clone(), items);
        sha
    }

    fn head_tree(&self, branch: &str) -> Option<&BTreeMap<String, TreeItem>> {
        let commit = self.commits.get(self.refs.get(branch)?)?;
        self.trees.get(&commit.tree)
    }
}

#[derive(Default)]
pub struct InMemoryGitHub {
    state: Mutex<State>,
}

impl InMemoryGitHub {
    /// A repository with one branch whose single commit holds `files`.
    pub fn with_branch(branch: &str, files: &[(&str, &str)]) -> Self {
        let github = Self::default();
        github.add_branch(branch, files);
        github
    }

    pub fn add_branch(&self, branch: &str, files: &[(&str, &str)]) {
        let mut state = self.lock();
        let mut items = BTreeMap::new();
        for (path, content) in files {
            let sha = git_blob_id(content.as_bytes());
            state.blobs.insert(sha.clone(), content.as_bytes().to_vec());
            items.insert(
                path.to_string(),
                TreeItem {
                    mode: "100644".to_string(),
                    kind: "blob".to_string(),
                    sha,
                },
            );
        }
        let tree = state.store_tree(items);
        let commit = state.next_id("commit");
        state.commits.insert(
            commit.clone(),
            StoredCommit {
                tree,
                parents: Vec::new(),
                message: "Initial commit".to_string(),
            },
        );
        state.refs.insert(branch.to_string(), commit);
    }

    /// Answer requests whose method matches and whose path contains `needle` with `status`.
    pub fn fail_when(&self, method: &str, needle: &str, status: u16) {
        self.lock()
            .failures
            .push((method.to_string(), needle.to_string(), status));
    }

    pub fn head(&self, branch: &str) -> Option<String> {
        self.lock().refs.get(branch).cloned()
    }

    pub fn commit_message(&self, sha: &str) -> Option<String> {
        self.lock().commits.get(sha).map(|c| c.message.clone())
    }

    pub fn commit_parents(&self, sha: &str) -> Vec<String> {
        self.lock()
            .commits
            .get(sha)
            .map(|c| c.parents.clone())
            .unwrap_or_default()
    }

    /// Blob paths at the branch head, sorted.
    pub fn tree_paths(&self, branch: &str) -> Vec<String> {
        self.lock()
            .head_tree(branch)
            .map(|items| items.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn blob_content(&self, branch: &str, path: &str) -> Option<String> {
        let state = self.lock();
        let item = state.head_tree(branch)?.get(path)?;
        let bytes = state.blobs.get(&item.sha)?;
        Some(String::from_utf8_lossy(bytes).to_string())
    }

    /// Number of calls with `method` whose path contains `needle`.
    pub fn count(&self, method: &str, needle: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.method == method && c.path.contains(needle))
            .count()
    }

    /// Number of calls that were not plain reads.
    pub fn mutation_count(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.method != "GET").count()
    }

    pub fn last_body(&self, method: &str, needle: &str) -> Option<Value> {
        self.lock()
            .calls
            .iter()
            .rev()
            .find(|c| c.method == method && c.path.contains(needle))
            .and_then(|c| c.body.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn upstream(status: u16, message: &str) -> SyncError {
    SyncError::Upstream {
        status,
        message: message.to_string(),
    }
}

fn json_response(status: u16, body: Value) -> Result<ApiResponse> {
    Ok(ApiResponse {
        status,
        body: ApiBody::Json(body),
    })
}

/// Directory entries implied by a flat list of paths.
fn implied_dirs(items: &BTreeMap<String, TreeItem>) -> BTreeSet<String> {
    let mut dirs = BTreeSet::new();
    for path in items.keys() {
        let mut parts: Vec<&str> = path.split('/').collect();
        parts.pop();
        for i in 1..=parts.len() {
            dirs.insert(parts[..i].join("/"));
        }
    }
    dirs
}

#[async_trait]
impl UpstreamApi for InMemoryGitHub {
    async fn invoke(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<ApiResponse> {
        let mut state = self.lock();
        let method = method.as_str().to_string();
        state.calls.push(RecordedCall {
            method: method.clone(),
            path: path.to_string(),
            body: body.clone(),
        });

        if let Some((_, _, status)) = state
            .failures
            .iter()
            .find(|(m, needle, _)| *m == method && path.contains(needle.as_str()))
        {
            return Err(upstream(*status, "injected failure"));
        }

        let rest = path
            .trim_start_matches('/')
            .splitn(4, '/')
            .nth(3)
            .ok_or_else(|| upstream(404, "Not Found"))?
            .to_string();
        let body = body.unwrap_or(Value::Null);

        match (method.as_str(), rest.as_str()) {
            ("GET", r) if r.starts_with("git/ref/heads/") => {
                let branch = &r["git/ref/heads/".len()..];
                let sha = state
                    .refs
                    .get(branch)
                    .ok_or_else(|| upstream(404, "Not Found"))?;
                json_response(
                    200,
                    json!({ "ref": format!("refs/heads/{}", branch), "object": { "sha": sha, "type": "commit" } }),
                )
            }
            ("GET", r) if r.starts_with("git/commits/") => {
                let sha = &r["git/commits/".len()..];
                let commit = state
                    .commits
                    .get(sha)
                    .ok_or_else(|| upstream(404, "Not Found"))?;
                json_response(
                    200,
                    json!({
                        "sha": sha,
                        "tree": { "sha": commit.tree },
                        "parents": commit.parents.iter().map(|p| json!({ "sha": p })).collect::<Vec<_>>(),
                        "message": commit.message,
                    }),
                )
            }
            ("GET", r) if r.starts_with("git/trees/") => {
                let sha = &r["git/trees/".len()..];
                let items = state
                    .trees
                    .get(sha)
                    .ok_or_else(|| upstream(404, "Not Found"))?;
                let recursive = query.iter().any(|(k, _)| *k == "recursive");

                let mut tree = Vec::new();
                if recursive {
                    for dir in implied_dirs(items) {
                        tree.push(json!({ "path": dir, "mode": "040000", "type": "tree", "sha": git_blob_id(dir.as_bytes()) }));
                    }
                }
                for (path, item) in items {
                    if recursive || !path.contains('/') {
                        let size = state.blobs.get(&item.sha).map(|b| b.len());
                        tree.push(json!({ "path": path, "mode": item.mode, "type": item.kind, "sha": item.sha, "size": size }));
                    }
                }
                json_response(200, json!({ "sha": sha, "tree": tree, "truncated": false }))
            }
            ("POST", "git/blobs") => {
                let content = body
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| upstream(422, "content is required"))?;
                let bytes = STANDARD
                    .decode(content)
                    .map_err(|_| upstream(422, "invalid base64"))?;
                let sha = git_blob_id(&bytes);
                state.blobs.insert(sha.clone(), bytes);
                json_response(201, json!({ "sha": sha }))
            }
            ("POST", "git/trees") => {
                let mut items = match body.get("base_tree").and_then(Value::as_str) {
                    Some(base) => state
                        .trees
                        .get(base)
                        .cloned()
                        .ok_or_else(|| upstream(422, "base_tree not found"))?,
                    None => BTreeMap::new(),
                };
                let entries = body
                    .get("tree")
                    .and_then(Value::as_array)
                    .ok_or_else(|| upstream(422, "tree is required"))?;
                for entry in entries {
                    let path = entry
                        .get("path")
                        .and_then(Value::as_str)
                        .ok_or_else(|| upstream(422, "path is required"))?
                        .to_string();
                    match entry.get("sha").and_then(Value::as_str) {
                        None => {
                            items.remove(&path);
                        }
                        Some(sha) => {
                            let kind = entry.get("type").and_then(Value::as_str).unwrap_or("blob");
                            if kind == "blob" && !state.blobs.contains_key(sha) {
                                return Err(upstream(422, "BadObjectState"));
                            }
                            items.insert(
                                path,
                                TreeItem {
                                    mode: entry.get("mode").and_then(Value::as_str).unwrap_or("100644").to_string(),
                                    kind: kind.to_string(),
                                    sha: sha.to_string(),
                                },
                            );
                        }
                    }
                }
                let sha = state.store_tree(items);
                json_response(201, json!({ "sha": sha }))
            }
            ("POST", "git/commits") => {
                let tree = body
                    .get("tree")
                    .and_then(Value::as_str)
                    .filter(|t| state.trees.contains_key(*t))
                    .ok_or_else(|| upstream(422, "tree not found"))?
                    .to_string();
                let parents: Vec<String> = body
                    .get("parents")
                    .and_then(Value::as_array)
                    .map(|ps| ps.iter().filter_map(|p| p.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                let message = body.get("message").and_then(Value::as_str).unwrap_or("").to_string();
                let sha = state.next_id("commit");
                state.commits.insert(
                    sha.clone(),
                    StoredCommit {
                        tree: tree.clone(),
                        parents,
                        message,
                    },
                );
                json_response(201, json!({ "sha": sha, "tree": { "sha": tree } }))
            }
            ("PATCH", r) if r.starts_with("git/refs/heads/") => {
                let branch = r["git/refs/heads/".len()..].to_string();
                let new_sha = body
                    .get("sha")
                    .and_then(Value::as_str)
                    .ok_or_else(|| upstream(422, "sha is required"))?
                    .to_string();
                let force = body.get("force").and_then(Value::as_bool).unwrap_or(false);
                let current = state
                    .refs
                    .get(&branch)
                    .cloned()
                    .ok_or_else(|| upstream(422, "Reference does not exist"))?;
                let commit = state
                    .commits
                    .get(&new_sha)
                    .ok_or_else(|| upstream(422, "Object does not exist"))?;
                if !force && !commit.parents.contains(&current) {
                    return Err(upstream(422, "Update is not a fast forward"));
                }
                state.refs.insert(branch.clone(), new_sha.clone());
                json_response(
                    200,
                    json!({ "ref": format!("refs/heads/{}", branch), "object": { "sha": new_sha } }),
                )
            }
            _ => Err(upstream(404, "Not Found")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_non_fast_forward_is_rejected() {
        let github = InMemoryGitHub::with_branch("main", &[("a", "1")]);
        github.add_branch("other", &[("b", "2")]);
        let foreign = github.head("other").unwrap();

        let err = github
            .send_json(
                Method::PATCH,
                "repos/o/r/git/refs/heads/main",
                json!({ "sha": foreign, "force": false }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(422));
    }

    #[tokio::test]
    async fn test_recursive_tree_includes_dirs() {
        let github = InMemoryGitHub::with_branch("main", &[("a/b/c.txt", "x")]);
        let head = github.head("main").unwrap();
        let commit = github
            .get_json(&format!("repos/o/r/git/commits/{}", head), &[])
            .await
            .unwrap();
        let tree_sha = commit["tree"]["sha"].as_str().unwrap().to_string();

        let tree = github
            .get_json(&format!("repos/o/r/git/trees/{}", tree_sha), &[("recursive", "1")])
            .await
            .unwrap();
        let kinds: Vec<_> = tree["tree"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| (e["path"].as_str().unwrap().to_string(), e["type"].as_str().unwrap().to_string()))
            .collect();
        assert!(kinds.contains(&("a".to_string(), "tree".to_string())));
        assert!(kinds.contains(&("a/b".to_string(), "tree".to_string())));
        assert!(kinds.contains(&("a/b/c.txt".to_string(), "blob".to_string())));
    }
}
