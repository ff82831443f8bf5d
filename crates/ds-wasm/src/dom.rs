//! `web-sys` document adapter for the video suppressor.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Array;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    Document, DocumentFragment, Element, HtmlMediaElement, MutationObserver, MutationObserverInit,
    MutationRecord, Node, NodeList, ShadowRoot,
};

use ds_core::suppressor::{MediaTree, VideoSuppressor};

use crate::chrome::js_message;

/// Error type for DOM calls that threw.
#[derive(Debug, thiserror::Error)]
#[error("DOM error: {0}")]
pub struct DomError(String);

impl From<JsValue> for DomError {
    fn from(value: JsValue) -> Self {
        Self(js_message(value))
    }
}

/// The frame's live document.
pub struct WebDom {
    document: Document,
}

impl WebDom {
    pub fn new(document: Document) -> Self {
        Self { document }
    }

    fn media(node: &Node) -> Result<&HtmlMediaElement, DomError> {
        node.dyn_ref::<HtmlMediaElement>()
            .ok_or_else(|| DomError("node is not a media element".to_string()))
    }
}

fn collect(list: NodeList, out: &mut Vec<Node>) {
    for i in 0..list.length() {
        if let Some(node) = list.item(i) {
            out.push(node);
        }
    }
}

fn query_all(root: &Node, selector: &str) -> Option<NodeList> {
    if let Some(document) = root.dyn_ref::<Document>() {
        document.query_selector_all(selector).ok()
    } else if let Some(element) = root.dyn_ref::<Element>() {
        element.query_selector_all(selector).ok()
    } else if let Some(fragment) = root.dyn_ref::<DocumentFragment>() {
        fragment.query_selector_all(selector).ok()
    } else {
        None
    }
}

impl MediaTree for WebDom {
    type Node = Node;
    type Error = DomError;

    fn document(&self) -> Node {
        self.document.clone().into()
    }

    fn tree_root(&self, node: &Node) -> Node {
        node.get_root_node()
    }

    fn is_element(&self, node: &Node) -> bool {
        node.node_type() == Node::ELEMENT_NODE
    }

    fn videos_in(&self, root: &Node) -> Vec<Node> {
        let mut videos = Vec::new();
        if root.node_name().eq_ignore_ascii_case("video") {
            videos.push(root.clone());
        }
        if let Some(list) = query_all(root, "video") {
            collect(list, &mut videos);
        }
        videos
    }

    fn attached_shadow_roots(&self) -> Vec<Node> {
        let mut elements = Vec::new();
        if let Ok(list) = self.document.query_selector_all("*") {
            collect(list, &mut elements);
        }
        elements
            .iter()
            .filter_map(|node| node.dyn_ref::<Element>().and_then(Element::shadow_root))
            .map(Node::from)
            .collect()
    }

    fn has_marked_ancestor(&self, node: &Node, attribute: &str) -> bool {
        let mut current = Some(node.clone());
        while let Some(node) = current {
            if let Some(element) = node.dyn_ref::<Element>() {
                if element.has_attribute(attribute) {
                    return true;
                }
            }
            current = match node.parent_node() {
                Some(parent) => Some(parent),
                None => node
                    .dyn_ref::<ShadowRoot>()
                    .map(|shadow| Node::from(shadow.host())),
            };
        }
        false
    }

    fn is_paused(&self, video: &Node) -> Result<bool, DomError> {
        Ok(Self::media(video)?.paused())
    }

    fn pause(&mut self, video: &Node) -> Result<(), DomError> {
        Ok(Self::media(video)?.pause()?)
    }

    fn has_attribute(&self, video: &Node, name: &str) -> bool {
        video
            .dyn_ref::<Element>()
            .map(|element| element.has_attribute(name))
            .unwrap_or(false)
    }

    fn remove_attribute(&mut self, video: &Node, name: &str) -> Result<(), DomError> {
        Ok(Self::media(video)?.remove_attribute(name)?)
    }

    fn set_autoplay(&mut self, video: &Node, autoplay: bool) -> Result<(), DomError> {
        Self::media(video)?.set_autoplay(autoplay);
        Ok(())
    }

    fn set_muted(&mut self, video: &Node, muted: bool) -> Result<(), DomError> {
        Self::media(video)?.set_muted(muted);
        Ok(())
    }

    fn current_src(&self, video: &Node) -> Result<String, DomError> {
        Ok(Self::media(video)?.current_src())
    }

    fn set_src(&mut self, video: &Node, src: &str) -> Result<(), DomError> {
        Self::media(video)?.set_src(src);
        Ok(())
    }

    fn load(&mut self, video: &Node) -> Result<(), DomError> {
        Self::media(video)?.load();
        Ok(())
    }
}

struct PageState {
    dom: WebDom,
    suppressor: VideoSuppressor<WebDom>,
}

/// Activate `suppressor` on `document` and keep it running.
///
/// The observer and its callback live for the lifetime of the frame.
pub fn run(document: Document, suppressor: VideoSuppressor<WebDom>) -> Result<(), JsValue> {
    let state = Rc::new(RefCell::new(PageState {
        dom: WebDom::new(document),
        suppressor,
    }));

    let callback_state = state.clone();
    let callback = Closure::<dyn FnMut(Array, MutationObserver)>::new(move |records: Array, _: MutationObserver| {
        let mut guard = callback_state.borrow_mut();
        let PageState { dom, suppressor } = &mut *guard;
        for record in records.iter() {
            let record: MutationRecord = record.unchecked_into();
            let Some(target) = record.target() else {
                continue;
            };
            let mut added = Vec::new();
            collect(record.added_nodes(), &mut added);
            suppressor.on_nodes_added(dom, &target, &added);
        }
    });
    let observer = MutationObserver::new(callback.as_ref().unchecked_ref())?;
    callback.forget();

    let mut guard = state.borrow_mut();
    let PageState { dom, suppressor } = &mut *guard;
    let report = suppressor.activate(dom);

    let options = MutationObserverInit::new();
    options.set_child_list(true);
    options.set_subtree(true);
    for root in suppressor.watched_roots() {
        observer.observe_with_options(root, &options)?;
    }

    log::debug!(
        "Video suppressor watching {} roots, {} videos stopped",
        suppressor.watched_roots().len(),
        report.suppressed
    );
    Ok(())
}
