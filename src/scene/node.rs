//! Scene nodes and the per-node state the scene graph keeps

use std::collections::BTreeMap;

use cgmath::{Matrix4, One, Quaternion, SquareMatrix, Vector3};
use log::warn;
use slotmap::SlotMap;

use crate::cameras::Camera;
use crate::error::{EngineError, Result};
use crate::lights::Light;
use crate::meshes::Mesh;
use crate::misc::{EventState, Observable, ObserverHandle};
use crate::scene::animation::{Animation, AnimationRange};
use crate::scene::behavior::Behavior;
use crate::scene::NodeId;

/// Arena of every node of a scene
pub type NodeArena = SlotMap<NodeId, Node>;

/// What a node carries besides its transform
#[derive(Debug)]
pub enum NodeKind {
    TransformNode,
    Mesh(Box<Mesh>),
    Camera(Box<Camera>),
    Light(Box<Light>),
}

/// Local transform as it was when the world matrix was last computed
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct NodeCache {
    pub parent: Option<NodeId>,
    pub position: Vector3<f32>,
    pub rotation: Quaternion<f32>,
    pub scaling: Vector3<f32>,
}

pub(crate) struct BehaviorSlot {
    pub behavior: Box<dyn Behavior>,
    pub attached: bool,
}

pub struct Node {
    pub name: String,
    pub id: String,
    /// Free-form state tag, unused by the engine
    pub state: String,
    pub kind: NodeKind,
    pub position: Vector3<f32>,
    pub rotation: Quaternion<f32>,
    pub scaling: Vector3<f32>,
    pub animations: Vec<Animation>,
    pub metadata: Option<serde_json::Value>,
    /// Fires once, when the node is disposed
    pub on_dispose: Observable<NodeId>,
    /// Fires when the node becomes ready
    pub on_ready: Observable<NodeId>,
    unique_id: u64,
    pub(crate) enabled: bool,
    ready: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) behaviors: Vec<BehaviorSlot>,
    ranges: BTreeMap<String, AnimationRange>,
    pub(crate) world_matrix: Matrix4<f32>,
    pub(crate) cache: Option<NodeCache>,
    /// Render id of the last frame the world matrix was checked
    pub(crate) current_render_id: Option<u64>,
    /// Bumped whenever the world matrix changes
    pub(crate) child_update_id: u64,
    /// Parent's `child_update_id` when the world matrix was computed
    pub(crate) parent_update_id: u64,
    on_dispose_observer: Option<ObserverHandle>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("class", &self.get_class_name())
            .field("unique_id", &self.unique_id)
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Node {
    pub fn new(name: &str, kind: NodeKind, unique_id: u64) -> Self {
        Self {
            name: name.to_string(),
            id: name.to_string(),
            state: String::new(),
            kind,
            position: Vector3::new(0.0, 0.0, 0.0),
            rotation: Quaternion::one(),
            scaling: Vector3::new(1.0, 1.0, 1.0),
            animations: Vec::new(),
            metadata: None,
            on_dispose: Observable::new(),
            on_ready: Observable::new(),
            unique_id,
            enabled: true,
            ready: true,
            parent: None,
            children: Vec::new(),
            behaviors: Vec::new(),
            ranges: BTreeMap::new(),
            world_matrix: Matrix4::identity(),
            cache: None,
            current_render_id: None,
            child_update_id: 0,
            parent_update_id: 0,
            on_dispose_observer: None,
        }
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn get_class_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::TransformNode => "TransformNode",
            NodeKind::Mesh(_) => "Mesh",
            NodeKind::Camera(camera) => camera.get_class_name(),
            NodeKind::Light(light) => light.get_class_name(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Direct children, in insertion order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        match &self.kind {
            NodeKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn mesh_mut(&mut self) -> Option<&mut Mesh> {
        match &mut self.kind {
            NodeKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn camera(&self) -> Option<&Camera> {
        match &self.kind {
            NodeKind::Camera(camera) => Some(camera),
            _ => None,
        }
    }

    pub fn camera_mut(&mut self) -> Option<&mut Camera> {
        match &mut self.kind {
            NodeKind::Camera(camera) => Some(camera),
            _ => None,
        }
    }

    pub fn light(&self) -> Option<&Light> {
        match &self.kind {
            NodeKind::Light(light) => Some(light),
            _ => None,
        }
    }

    pub fn light_mut(&mut self) -> Option<&mut Light> {
        match &mut self.kind {
            NodeKind::Light(light) => Some(light),
            _ => None,
        }
    }

    /// Replaces the observer registered by the previous call
    pub fn set_on_dispose<F>(&mut self, callback: F)
    where
        F: FnMut(&mut NodeId, &mut EventState) + 'static,
    {
        if let Some(handle) = self.on_dispose_observer.take() {
            self.on_dispose.remove(handle);
        }
        self.on_dispose_observer = Some(self.on_dispose.add(callback));
    }

    pub fn get_behavior_by_name(&self, name: &str) -> Option<&dyn Behavior> {
        self.behaviors
            .iter()
            .find(|slot| slot.behavior.name() == name)
            .map(|slot| slot.behavior.as_ref())
    }

    pub fn get_behavior_by_name_mut(&mut self, name: &str) -> Option<&mut dyn Behavior> {
        self.behaviors
            .iter_mut()
            .find(|slot| slot.behavior.name() == name)
            .map(|slot| slot.behavior.as_mut())
    }

    pub fn behavior_count(&self) -> usize {
        self.behaviors.len()
    }

    /// Last computed world matrix
    pub fn get_world_matrix(&self) -> Matrix4<f32> {
        self.world_matrix
    }

    /// Translation, rotation then scaling
    pub fn local_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position)
            * Matrix4::from(self.rotation)
            * Matrix4::from_nonuniform_scale(self.scaling.x, self.scaling.y, self.scaling.z)
    }

    /// Whether the local transform still matches the cache
    pub(crate) fn is_locally_synchronized(&self) -> bool {
        self.cache.is_some_and(|cache| {
            cache.position == self.position
                && cache.rotation == self.rotation
                && cache.scaling == self.scaling
        })
    }

    pub(crate) fn store_cache(&mut self) {
        self.cache = Some(NodeCache {
            parent: self.parent,
            position: self.position,
            rotation: self.rotation,
            scaling: self.scaling,
        });
    }

    pub(crate) fn cached_parent(&self) -> Option<NodeId> {
        self.cache.and_then(|cache| cache.parent)
    }

    /// Whether the parent changed since the cache was stored; `update`
    /// records the new parent
    pub fn has_new_parent(&mut self, update: bool) -> bool {
        let cached = self.cache.and_then(|cache| cache.parent);
        if cached == self.parent {
            return false;
        }
        if update {
            if let Some(cache) = self.cache.as_mut() {
                cache.parent = self.parent;
            }
        }
        true
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Fires `on_ready` only on a not-ready to ready transition
    pub fn set_ready(&mut self, id: NodeId, ready: bool) {
        if ready == self.ready {
            return;
        }
        if !ready {
            self.ready = false;
            return;
        }
        let mut id = id;
        self.on_ready.notify(&mut id);
        self.ready = true;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn get_animations(&self) -> &[Animation] {
        &self.animations
    }

    pub fn get_animation_by_name(&self, name: &str) -> Option<&Animation> {
        self.animations.iter().find(|animation| animation.name == name)
    }

    /// Adds a range to the node and its animations, unless one with this
    /// name exists
    pub fn create_animation_range(&mut self, name: &str, from: f32, to: f32) {
        if self.ranges.contains_key(name) {
            return;
        }
        self.ranges
            .insert(name.to_string(), AnimationRange::new(name, from, to));
        for animation in &mut self.animations {
            animation.create_range(name, from, to);
        }
    }

    pub fn delete_animation_range(&mut self, name: &str, delete_frames: bool) {
        for animation in &mut self.animations {
            animation.delete_range(name, delete_frames);
        }
        self.ranges.remove(name);
    }

    pub fn get_animation_range(&self, name: &str) -> Option<&AnimationRange> {
        self.ranges.get(name)
    }

    pub fn serialize_animation_ranges(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.ranges
                .values()
                .map(|range| {
                    serde_json::json!({
                        "name": range.name,
                        "from": range.from,
                        "to": range.to,
                    })
                })
                .collect(),
        )
    }

    /// Reads the `ranges` array of a serialized node
    pub fn parse_animation_ranges(&mut self, parsed_node: &serde_json::Value) -> Result<()> {
        let Some(ranges) = parsed_node.get("ranges") else {
            return Ok(());
        };
        let ranges = ranges
            .as_array()
            .ok_or_else(|| EngineError::parse("animation ranges", "'ranges' is not an array"))?;
        for range in ranges {
            let name = range.get("name").and_then(serde_json::Value::as_str);
            let from = range.get("from").and_then(serde_json::Value::as_f64);
            let to = range.get("to").and_then(serde_json::Value::as_f64);
            match (name, from, to) {
                (Some(name), Some(from), Some(to)) => {
                    self.create_animation_range(name, from as f32, to as f32)
                }
                _ => warn!("Skipping malformed animation range on '{}'", self.name),
            }
        }
        Ok(())
    }

    /// Writes an animated value to the property named by `path`
    pub(crate) fn set_animated_property(&mut self, path: &str, value: f32) -> bool {
        let slot = match path {
            "position.x" => &mut self.position.x,
            "position.y" => &mut self.position.y,
            "position.z" => &mut self.position.z,
            "scaling.x" => &mut self.scaling.x,
            "scaling.y" => &mut self.scaling.y,
            "scaling.z" => &mut self.scaling.z,
            _ => match (&mut self.kind, path) {
                (NodeKind::Mesh(mesh), "visibility") => &mut mesh.visibility,
                (NodeKind::Light(light), "intensity") => &mut light.intensity,
                (NodeKind::Camera(camera), "fov") => &mut camera.fov,
                _ => return false,
            },
        };
        *slot = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::scene::animation::AnimationKey;

    fn id() -> NodeId {
        SlotMap::<NodeId, ()>::with_key().insert(())
    }

    #[test]
    fn test_on_ready_fires_on_transition_only() {
        let mut node = Node::new("n", NodeKind::TransformNode, 1);
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        node.on_ready.add(move |_, _| counter.set(counter.get() + 1));
        node.set_ready(id(), true);
        assert_eq!(fired.get(), 0);
        node.set_ready(id(), false);
        node.set_ready(id(), true);
        node.set_ready(id(), true);
        assert_eq!(fired.get(), 1);
        assert!(node.is_ready());
    }

    #[test]
    fn test_set_on_dispose_replaces_observer() {
        let mut node = Node::new("n", NodeKind::TransformNode, 1);
        node.set_on_dispose(|_, _| {});
        node.set_on_dispose(|_, _| {});
        assert_eq!(node.on_dispose.len(), 1);
    }

    #[test]
    fn test_animation_ranges_propagate() {
        let mut node = Node::new("n", NodeKind::TransformNode, 1);
        let mut animation = Animation::new("slide", "position.x", 30.0);
        animation.set_keys(vec![AnimationKey::new(0.0, 0.0), AnimationKey::new(30.0, 1.0)]);
        node.animations.push(animation);

        node.create_animation_range("walk", 0.0, 10.0);
        node.create_animation_range("walk", 5.0, 20.0);
        assert_eq!(node.get_animation_range("walk").map(|r| r.to), Some(10.0));
        assert!(node.animations[0].get_range("walk").is_some());

        node.delete_animation_range("walk", false);
        assert!(node.get_animation_range("walk").is_none());
        assert!(node.animations[0].get_range("walk").is_none());
        assert_eq!(node.animations[0].keys().len(), 2);
    }

    #[test]
    fn test_animation_ranges_serialization() {
        let mut node = Node::new("n", NodeKind::TransformNode, 1);
        node.create_animation_range("a", 0.0, 5.0);
        node.create_animation_range("b", 5.0, 9.0);
        let serialized = serde_json::json!({ "ranges": node.serialize_animation_ranges() });

        let mut parsed = Node::new("m", NodeKind::TransformNode, 2);
        parsed.parse_animation_ranges(&serialized).unwrap();
        assert_eq!(parsed.get_animation_range("b").map(|r| (r.from, r.to)), Some((5.0, 9.0)));
        assert!(parsed
            .parse_animation_ranges(&serde_json::json!({ "ranges": 3 }))
            .is_err());
    }

    #[test]
    fn test_local_matrix_order() {
        let mut node = Node::new("n", NodeKind::TransformNode, 1);
        node.position = Vector3::new(1.0, 0.0, 0.0);
        node.scaling = Vector3::new(2.0, 2.0, 2.0);
        let moved = node.local_matrix() * cgmath::Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert_eq!(moved, cgmath::Vector4::new(3.0, 0.0, 0.0, 1.0));
    }
}
