//! In-memory document tree.
//!
//! A small arena DOM with just enough structure for the video suppressor:
//! elements with attributes, shadow roots, video playback state, and a
//! queue of structural-change records in the shape a mutation observer
//! delivers them.

use std::collections::BTreeMap;

use crate::suppressor::MediaTree;

/// Handle of a node in a [`MemoryDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Error type for video operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("Security error: operation on node {0:?} is not allowed")]
    Security(NodeId),
    #[error("Node {0:?} is not a video element")]
    NotVideo(NodeId),
}

/// Playback state of a video element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoState {
    pub paused: bool,
    pub autoplay: bool,
    pub muted: bool,
    pub current_src: String,
    /// Media data is being downloaded
    pub fetching: bool,
    pub loads: usize,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Document,
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
        shadow_root: Option<NodeId>,
        video: Option<VideoState>,
    },
    ShadowRoot {
        host: NodeId,
    },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    hostile: bool,
}

/// Nodes added under `target` by one structural change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
}

/// Arena-backed document.
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    nodes: Vec<Node>,
    document_element: NodeId,
    body: NodeId,
    records: Vec<MutationRecord>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    /// Document with `<html><body></body></html>`.
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
                hostile: false,
            }],
            document_element: NodeId(0),
            body: NodeId(0),
            records: Vec::new(),
        };
        let html = doc.create_element("html");
        let body = doc.create_element("body");
        doc.append_child(NodeId(0), html);
        doc.append_child(html, body);
        doc.document_element = html;
        doc.body = body;
        doc.records.clear();
        doc
    }

    pub fn document_element(&self) -> NodeId {
        self.document_element
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
            hostile: false,
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let video = (tag == "video").then(|| VideoState {
            paused: true,
            ..VideoState::default()
        });
        self.push(NodeKind::Element {
            tag: tag.to_string(),
            attributes: BTreeMap::new(),
            shadow_root: None,
            video,
        })
    }

    /// Detached video with a network source, optionally autoplaying.
    pub fn create_video(&mut self, src: &str, playing: bool) -> NodeId {
        let id = self.create_element("video");
        self.set_attribute(id, "src", src);
        if playing {
            self.set_attribute(id, "autoplay", "");
        }
        if let Some(state) = self.video_state_mut(id) {
            state.paused = !playing;
            state.autoplay = playing;
            state.current_src = src.to_string();
            state.fetching = !src.is_empty();
        }
        id
    }

    /// Append `child` to `parent`.
    ///
    /// A change record is queued only when `parent` is connected to the
    /// document or to a shadow root, the trees an observer can watch.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(old_parent) = self.nodes[child.0].parent {
            self.nodes[old_parent.0].children.retain(|c| *c != child);
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);

        let root = self.tree_root(&parent);
        if matches!(self.nodes[root.0].kind, NodeKind::Document | NodeKind::ShadowRoot { .. }) {
            self.records.push(MutationRecord {
                target: parent,
                added: vec![child],
            });
        }
    }

    /// Attach an open shadow root to `host`, or return the existing one.
    pub fn attach_shadow(&mut self, host: NodeId) -> NodeId {
        if let NodeKind::Element {
            shadow_root: Some(root),
            ..
        } = &self.nodes[host.0].kind
        {
            return *root;
        }
        let root = self.push(NodeKind::ShadowRoot { host });
        if let NodeKind::Element { shadow_root, .. } = &mut self.nodes[host.0].kind {
            *shadow_root = Some(root);
        }
        root
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[node.0].kind {
            attributes.insert(name.to_string(), value.to_string());
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        match &self.nodes[node.0].kind {
            NodeKind::Element { attributes, .. } => attributes.get(name).map(String::as_str),
            _ => None,
        }
    }

    /// Make every video operation on `node` fail, like a cross-origin frame.
    pub fn make_hostile(&mut self, node: NodeId) {
        self.nodes[node.0].hostile = true;
    }

    pub fn video_state(&self, node: NodeId) -> Option<&VideoState> {
        match &self.nodes[node.0].kind {
            NodeKind::Element { video, .. } => video.as_ref(),
            _ => None,
        }
    }

    fn video_state_mut(&mut self, node: NodeId) -> Option<&mut VideoState> {
        match &mut self.nodes[node.0].kind {
            NodeKind::Element { video, .. } => video.as_mut(),
            _ => None,
        }
    }

    fn video(&self, node: NodeId) -> Result<&VideoState, DomError> {
        if self.nodes[node.0].hostile {
            return Err(DomError::Security(node));
        }
        self.video_state(node).ok_or(DomError::NotVideo(node))
    }

    fn video_mut(&mut self, node: NodeId) -> Result<&mut VideoState, DomError> {
        if self.nodes[node.0].hostile {
            return Err(DomError::Security(node));
        }
        self.video_state_mut(node).ok_or(DomError::NotVideo(node))
    }

    /// Drain queued change records, oldest first.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    /// Light-tree descendants of `root`, `root` first, in document order.
    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.nodes[node.0].children.iter().rev().copied());
        }
        out
    }
}

impl MediaTree for MemoryDocument {
    type Node = NodeId;
    type Error = DomError;

    fn document(&self) -> NodeId {
        NodeId(0)
    }

    fn tree_root(&self, node: &NodeId) -> NodeId {
        let mut current = *node;
        while let Some(parent) = self.nodes[current.0].parent {
            current = parent;
        }
        current
    }

    fn is_element(&self, node: &NodeId) -> bool {
        matches!(self.nodes[node.0].kind, NodeKind::Element { .. })
    }

    fn videos_in(&self, root: &NodeId) -> Vec<NodeId> {
        self.descendants(*root)
            .into_iter()
            .filter(|node| matches!(&self.nodes[node.0].kind, NodeKind::Element { tag, .. } if tag == "video"))
            .collect()
    }

    fn attached_shadow_roots(&self) -> Vec<NodeId> {
        self.descendants(self.document())
            .into_iter()
            .filter_map(|node| match &self.nodes[node.0].kind {
                NodeKind::Element { shadow_root, .. } => *shadow_root,
                _ => None,
            })
            .collect()
    }

    fn has_marked_ancestor(&self, node: &NodeId, attribute: &str) -> bool {
        let mut current = Some(*node);
        while let Some(id) = current {
            current = match &self.nodes[id.0].kind {
                NodeKind::Element { attributes, .. } => {
                    if attributes.contains_key(attribute) {
                        return true;
                    }
                    self.nodes[id.0].parent
                }
                NodeKind::ShadowRoot { host } => Some(*host),
                NodeKind::Document => None,
            };
        }
        false
    }

    fn is_paused(&self, video: &NodeId) -> Result<bool, DomError> {
        Ok(self.video(*video)?.paused)
    }

    fn pause(&mut self, video: &NodeId) -> Result<(), DomError> {
        self.video_mut(*video)?.paused = true;
        Ok(())
    }

    fn has_attribute(&self, video: &NodeId, name: &str) -> bool {
        self.attribute(*video, name).is_some()
    }

    fn remove_attribute(&mut self, video: &NodeId, name: &str) -> Result<(), DomError> {
        if self.nodes[video.0].hostile {
            return Err(DomError::Security(*video));
        }
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[video.0].kind {
            attributes.remove(name);
        }
        Ok(())
    }

    fn set_autoplay(&mut self, video: &NodeId, autoplay: bool) -> Result<(), DomError> {
        self.video_mut(*video)?.autoplay = autoplay;
        Ok(())
    }

    fn set_muted(&mut self, video: &NodeId, muted: bool) -> Result<(), DomError> {
        self.video_mut(*video)?.muted = muted;
        Ok(())
    }

    fn current_src(&self, video: &NodeId) -> Result<String, DomError> {
        Ok(self.video(*video)?.current_src.clone())
    }

    fn set_src(&mut self, video: &NodeId, src: &str) -> Result<(), DomError> {
        self.video(*video)?;
        self.set_attribute(*video, "src", src);
        Ok(())
    }

    fn load(&mut self, video: &NodeId) -> Result<(), DomError> {
        let src = self.attribute(*video, "src").unwrap_or_default().to_string();
        let state = self.video_mut(*video)?;
        state.current_src = src;
        state.fetching = !state.current_src.is_empty();
        state.loads += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_content_is_a_separate_tree() {
        let mut doc = MemoryDocument::new();
        let host = doc.create_element("div");
        let body = doc.body();
        doc.append_child(body, host);
        let shadow = doc.attach_shadow(host);
        let video = doc.create_video("clip.mp4", false);
        doc.append_child(shadow, video);

        assert_eq!(doc.tree_root(&video), shadow);
        assert_eq!(doc.tree_root(&host), doc.document());
        assert!(doc.videos_in(&doc.document()).is_empty());
        assert_eq!(doc.videos_in(&shadow), vec![video]);
        assert_eq!(doc.attached_shadow_roots(), vec![shadow]);
    }

    #[test]
    fn marker_is_found_across_shadow_hosts() {
        let mut doc = MemoryDocument::new();
        let host = doc.create_element("div");
        doc.set_attribute(host, "data-visible-player", "");
        let body = doc.body();
        doc.append_child(body, host);
        let shadow = doc.attach_shadow(host);
        let video = doc.create_video("clip.mp4", false);
        doc.append_child(shadow, video);

        assert!(doc.has_marked_ancestor(&video, "data-visible-player"));
        assert!(!doc.has_marked_ancestor(&body, "data-visible-player"));
    }

    #[test]
    fn detached_appends_queue_no_records() {
        let mut doc = MemoryDocument::new();
        let wrapper = doc.create_element("div");
        let video = doc.create_video("clip.mp4", false);
        doc.append_child(wrapper, video);
        assert!(doc.take_records().is_empty());

        let body = doc.body();
        doc.append_child(body, wrapper);
        assert_eq!(
            doc.take_records(),
            vec![MutationRecord {
                target: body,
                added: vec![wrapper],
            }]
        );
    }

    #[test]
    fn load_of_empty_source_stops_fetching() {
        let mut doc = MemoryDocument::new();
        let video = doc.create_video("clip.mp4", true);
        doc.remove_attribute(&video, "src").unwrap();
        doc.load(&video).unwrap();

        let state = doc.video_state(video).unwrap();
        assert!(state.current_src.is_empty());
        assert!(!state.fetching);
        assert_eq!(state.loads, 1);
    }
}
