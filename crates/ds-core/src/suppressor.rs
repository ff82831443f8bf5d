//! In-page video suppression.
//!
//! One suppressor runs per frame once the registrar has injected it. It is
//! not settings-aware: its presence alone means media blocking is on.
//!
//! Activation suppresses every video already in the document, then watches
//! the document and every shadow root attached at that moment. Shadow roots
//! attached later are not watched; the scan runs once.

use std::fmt;
use std::ops::AddAssign;

use crate::config::{SaverConfig, StripSource};

/// DOM operations the suppressor needs.
///
/// Video operations are fallible; a failure only affects that element.
pub trait MediaTree {
    type Node: Clone + PartialEq;
    type Error: fmt::Display;

    fn document(&self) -> Self::Node;

    /// Root of the tree holding `node`: the document or a shadow root.
    fn tree_root(&self, node: &Self::Node) -> Self::Node;

    fn is_element(&self, node: &Self::Node) -> bool;

    /// Videos in `root`'s subtree, `root` included, without entering
    /// shadow roots.
    fn videos_in(&self, root: &Self::Node) -> Vec<Self::Node>;

    /// Shadow roots attached to elements of the document tree.
    fn attached_shadow_roots(&self) -> Vec<Self::Node>;

    /// Whether `node` or an ancestor, across shadow hosts, carries `attribute`.
    fn has_marked_ancestor(&self, node: &Self::Node, attribute: &str) -> bool;

    fn is_paused(&self, video: &Self::Node) -> Result<bool, Self::Error>;
    fn pause(&mut self, video: &Self::Node) -> Result<(), Self::Error>;
    fn has_attribute(&self, video: &Self::Node, name: &str) -> bool;
    fn remove_attribute(&mut self, video: &Self::Node, name: &str) -> Result<(), Self::Error>;
    fn set_autoplay(&mut self, video: &Self::Node, autoplay: bool) -> Result<(), Self::Error>;
    fn set_muted(&mut self, video: &Self::Node, muted: bool) -> Result<(), Self::Error>;
    fn current_src(&self, video: &Self::Node) -> Result<String, Self::Error>;
    fn set_src(&mut self, video: &Self::Node, src: &str) -> Result<(), Self::Error>;
    fn load(&mut self, video: &Self::Node) -> Result<(), Self::Error>;
}

/// Outcome of one suppression pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuppressReport {
    /// Videos fully suppressed
    pub suppressed: usize,
    /// Videos where an operation failed
    pub failed: usize,
    /// Suppressed videos whose source was left in place by policy
    pub source_kept: usize,
}

impl AddAssign for SuppressReport {
    fn add_assign(&mut self, other: Self) {
        self.suppressed += other.suppressed;
        self.failed += other.failed;
        self.source_kept += other.source_kept;
    }
}

/// Keeps every video in a frame paused, muted and sourceless.
pub struct VideoSuppressor<T: MediaTree> {
    strip_source: StripSource,
    marker: String,
    watched: Vec<T::Node>,
}

impl<T: MediaTree> VideoSuppressor<T> {
    pub fn new(strip_source: StripSource, marker: impl Into<String>) -> Self {
        Self {
            strip_source,
            marker: marker.into(),
            watched: Vec::new(),
        }
    }

    pub fn from_config(config: &SaverConfig) -> Self {
        Self::new(config.strip_source, config.visible_player_marker.clone())
    }

    pub fn is_active(&self) -> bool {
        !self.watched.is_empty()
    }

    /// Roots whose structural changes are handled.
    pub fn watched_roots(&self) -> &[T::Node] {
        &self.watched
    }

    /// Suppress existing videos and start watching.
    pub fn activate(&mut self, tree: &mut T) -> SuppressReport {
        if self.is_active() {
            return SuppressReport::default();
        }

        let document = tree.document();
        let mut report = self.suppress_subtree(tree, &document);
        self.watched.push(document);

        // One-time scan; roots attached later stay unwatched.
        for shadow_root in tree.attached_shadow_roots() {
            if !self.watched.contains(&shadow_root) {
                report += self.suppress_subtree(tree, &shadow_root);
                self.watched.push(shadow_root);
            }
        }

        log::debug!(
            "Video suppressor active on {} roots: {} suppressed, {} failed",
            self.watched.len(),
            report.suppressed,
            report.failed
        );
        report
    }

    /// Handle nodes added under `target`.
    ///
    /// Changes outside a watched root are ignored.
    pub fn on_nodes_added(&self, tree: &mut T, target: &T::Node, added: &[T::Node]) -> SuppressReport {
        let mut report = SuppressReport::default();
        let root = tree.tree_root(target);
        if !self.watched.contains(&root) {
            return report;
        }

        for node in added {
            if tree.is_element(node) {
                report += self.suppress_subtree(tree, node);
            }
        }
        report
    }

    /// Suppress every video in `root`'s subtree.
    pub fn suppress_subtree(&self, tree: &mut T, root: &T::Node) -> SuppressReport {
        let mut report = SuppressReport::default();
        for video in tree.videos_in(root) {
            match self.suppress_video(tree, &video) {
                Ok(true) => report.suppressed += 1,
                Ok(false) => {
                    report.suppressed += 1;
                    report.source_kept += 1;
                }
                Err(e) => {
                    log::debug!("Ignoring video suppression failure: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Suppress one video; returns whether its source was stripped.
    pub fn suppress_video(&self, tree: &mut T, video: &T::Node) -> Result<bool, T::Error> {
        if !tree.is_paused(video)? {
            tree.pause(video)?;
        }

        tree.remove_attribute(video, "autoplay")?;
        tree.set_autoplay(video, false)?;
        tree.set_muted(video, true)?;

        if !self.should_strip(tree, video) {
            return Ok(false);
        }

        if tree.has_attribute(video, "src") {
            tree.remove_attribute(video, "src")?;
        }
        if !tree.current_src(video)?.is_empty() {
            tree.set_src(video, "")?;
        }
        // Reloading the empty source abandons in-flight fetches.
        tree.load(video)?;
        Ok(true)
    }

    fn should_strip(&self, tree: &T, video: &T::Node) -> bool {
        match self.strip_source {
            StripSource::Always => true,
            StripSource::SkipWhenVisiblePlayer => !tree.has_marked_ancestor(video, &self.marker),
        }
    }
}
