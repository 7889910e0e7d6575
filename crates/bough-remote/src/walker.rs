//! Dumb HTTP fetch.
//!
//! Without a smart server the only thing to download is individual loose
//! objects. The walker starts at the wanted ids and follows every link:
//! commits to their tree and parents, tags to their object and trees to
//! their entries. Submodule entries point into another repository and are
//! not followed.

use crate::client::HttpClient;
use crate::http::{HttpRequest, HttpTransport};
use crate::{RemoteError, Result};
use bough_storage::{GitObject, LooseObjectDir, ObjectId, ObjectSource, ObjectType};
use bough_tree::TreeIter;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

/// Ids named by `key <hex>` lines in a commit or tag header.
pub(crate) fn header_links(data: &[u8], keys: &[&str]) -> Result<Vec<ObjectId>> {
    let mut links = Vec::new();
    for line in data.split(|&b| b == b'\n') {
        if line.is_empty() {
            break;
        }
        let Some(space) = line.iter().position(|&b| b == b' ') else {
            continue;
        };
        let key = &line[..space];
        if keys.iter().any(|k| k.as_bytes() == key) {
            links.push(ObjectId::from_hex_bytes(&line[space + 1..])?);
        }
    }
    Ok(links)
}

/// Walks a dumb server's loose objects into a local object directory.
pub struct Walker<'a, T> {
    client: &'a mut HttpClient<T>,
    base: &'a str,
    local: &'a LooseObjectDir,
    max_tree_depth: usize,
    fetched: usize,
}

impl<'a, T: HttpTransport> Walker<'a, T> {
    /// A walker downloading from `base` (with trailing `/`) into `local`.
    pub fn new(
        client: &'a mut HttpClient<T>,
        base: &'a str,
        local: &'a LooseObjectDir,
        max_tree_depth: usize,
    ) -> Self {
        Self {
            client,
            base,
            local,
            max_tree_depth,
            fetched: 0,
        }
    }

    /// Number of objects downloaded so far.
    pub fn fetched(&self) -> usize {
        self.fetched
    }

    fn download(&mut self, id: &ObjectId) -> Result<GitObject> {
        let url = format!("{}objects/{}", self.base, LooseObjectDir::relative_path(id));
        let response = self.client.send(HttpRequest::get(&url))?;
        match response.status {
            200..=299 => {}
            404 => {
                return Err(RemoteError::Failed(format!(
                    "Unable to find {id} under {}",
                    self.base
                )))
            }
            status => {
                return Err(RemoteError::Access {
                    url,
                    status,
                    message: response.plain_text_message(),
                })
            }
        }
        let compressed = response.bytes()?;
        self.local.write_compressed(id, &compressed)?;
        self.fetched += 1;
        debug!(%id, "downloaded object");
        Ok(LooseObjectDir::decode(&compressed)?)
    }

    fn object(&mut self, id: &ObjectId) -> Result<GitObject> {
        match self.local.read(id)? {
            Some(object) => Ok(object),
            None => self.download(id),
        }
    }

    /// Makes every object reachable from `targets` present locally.
    pub fn fetch(&mut self, targets: &[ObjectId]) -> Result<()> {
        let mut queue: VecDeque<(ObjectId, usize)> = targets.iter().map(|id| (*id, 0)).collect();
        let mut seen: HashSet<ObjectId> = HashSet::new();

        while let Some((id, depth)) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let object = self.object(&id)?;
            match object.object_type {
                ObjectType::Commit => {
                    for link in header_links(&object.data, &["tree", "parent"])? {
                        queue.push_back((link, 0));
                    }
                }
                ObjectType::Tag => {
                    for link in header_links(&object.data, &["object"])? {
                        queue.push_back((link, 0));
                    }
                }
                ObjectType::Tree => {
                    if depth >= self.max_tree_depth {
                        return Err(RemoteError::Failed(
                            "exceeded maximum allowed tree depth".to_string(),
                        ));
                    }
                    for entry in TreeIter::new(&object.data) {
                        let entry = entry?;
                        if entry.is_gitlink() {
                            continue;
                        }
                        queue.push_back((entry.id, depth + 1));
                    }
                }
                ObjectType::Blob => {}
            }
        }
        info!(fetched = self.fetched, walked = seen.len(), "dumb fetch complete");
        Ok(())
    }
}
