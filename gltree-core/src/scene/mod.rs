//! Scene-node tree and traversal.
//!
//! A [`SceneNode`] owns its children, so a scene is always a tree. Nodes that
//! draw something carry a [`Renderable`]; traversal is written once against
//! that trait and does not care what kind of node it is visiting.

pub mod camera;

pub use camera::{Camera, CameraNode};

use bitflags::bitflags;
use glam::Mat4;

bitflags! {
    /// Which parts of a node's traversal are enabled.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct RenderFlags: u8 {
        const BEFORE_CHILDREN = 1 << 0;
        const CHILDREN        = 1 << 1;
        const AFTER_CHILDREN  = 1 << 2;
    }
}

impl Default for RenderFlags {
    fn default() -> Self {
        RenderFlags::BEFORE_CHILDREN | RenderFlags::CHILDREN
    }
}

/// Per-frame state handed to every render hook.
#[derive(Debug, Clone, Default)]
pub struct FrameContext {
    frame: u64,
    delta_time: f32,
    cameras: Vec<Camera>,
}

impl FrameContext {
    /// An empty context before the first frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the next frame.
    pub fn advance(&mut self, delta_time: f32) {
        self.frame += 1;
        self.delta_time = delta_time;
        if !self.cameras.is_empty() {
            log::warn!(
                "{} camera(s) left on the stack at the end of a frame",
                self.cameras.len()
            );
            self.cameras.clear();
        }
    }

    /// Frames started so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Seconds since the previous frame.
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Makes `camera` current for the hooks that follow.
    pub fn push_camera(&mut self, camera: Camera) {
        self.cameras.push(camera);
    }

    /// Restores the previous camera.
    pub fn pop_camera(&mut self) -> Option<Camera> {
        self.cameras.pop()
    }

    /// The innermost active camera.
    pub fn camera(&self) -> Option<&Camera> {
        self.cameras.last()
    }
}

/// Transforms of the node whose hook is running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeTransform {
    pub local: Mat4,
    pub cascade: Mat4,
}

/// Render hooks of a scene node.
///
/// `E` is the error type hooks may fail with; the first error stops the
/// traversal and is returned to whoever started it.
pub trait Renderable<E> {
    /// Flags a node takes when this renderable is attached.
    fn render_flags(&self) -> RenderFlags {
        RenderFlags::default()
    }

    fn before_children(
        &mut self,
        _transform: &NodeTransform,
        _ctx: &mut FrameContext,
    ) -> Result<(), E> {
        Ok(())
    }

    fn after_children(
        &mut self,
        _transform: &NodeTransform,
        _ctx: &mut FrameContext,
    ) -> Result<(), E> {
        Ok(())
    }
}

/// A node of the scene tree: a local transform, flags, optional hooks and children.
pub struct SceneNode<E> {
    name: String,
    local: Mat4,
    cascade: Mat4,
    flags: RenderFlags,
    renderable: Option<Box<dyn Renderable<E>>>,
    children: Vec<SceneNode<E>>,
}

impl<E> SceneNode<E> {
    /// A grouping node with no hooks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local: Mat4::IDENTITY,
            cascade: Mat4::IDENTITY,
            flags: RenderFlags::CHILDREN,
            renderable: None,
            children: Vec::new(),
        }
    }

    /// A node driven by `renderable`, with the flags it asks for.
    pub fn with_renderable(name: impl Into<String>, renderable: Box<dyn Renderable<E>>) -> Self {
        let mut node = Self::new(name);
        node.flags = renderable.render_flags();
        node.renderable = Some(renderable);
        node
    }

    /// Replaces the local transform.
    pub fn with_transform(mut self, local: Mat4) -> Self {
        self.local = local;
        self
    }

    /// The node's name, used by [`SceneNode::find`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transform relative to the parent.
    pub fn local_transform(&self) -> Mat4 {
        self.local
    }

    /// Takes effect on the next traversal.
    pub fn set_local_transform(&mut self, local: Mat4) {
        self.local = local;
    }

    /// The transform computed by the most recent traversal.
    pub fn cascade_transform(&self) -> Mat4 {
        self.cascade
    }

    /// Which traversal steps run.
    pub fn render_flags(&self) -> RenderFlags {
        self.flags
    }

    /// Overrides the flags the renderable asked for.
    pub fn set_render_flags(&mut self, flags: RenderFlags) {
        self.flags = flags;
    }

    /// Appends a child and returns it.
    pub fn add_child(&mut self, child: SceneNode<E>) -> &mut SceneNode<E> {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Children in traversal order.
    pub fn children(&self) -> &[SceneNode<E>] {
        &self.children
    }

    /// Children in traversal order.
    pub fn children_mut(&mut self) -> &mut [SceneNode<E>] {
        &mut self.children
    }

    /// Detaches and returns the first direct child named `name`.
    pub fn remove_child(&mut self, name: &str) -> Option<SceneNode<E>> {
        let index = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(index))
    }

    /// Depth-first search by name, this node included.
    pub fn find(&self, name: &str) -> Option<&SceneNode<E>> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// Visits this subtree.
    ///
    /// The cascade transform is recomputed before any hook runs. Children are
    /// only visited when [`RenderFlags::CHILDREN`] is set, whether or not
    /// there are any.
    pub fn traverse(&mut self, parent_cascade: Mat4, ctx: &mut FrameContext) -> Result<(), E> {
        self.cascade = parent_cascade * self.local;
        let transform = NodeTransform {
            local: self.local,
            cascade: self.cascade,
        };

        if self.flags.contains(RenderFlags::BEFORE_CHILDREN) {
            if let Some(renderable) = self.renderable.as_mut() {
                renderable.before_children(&transform, ctx)?;
            }
        }

        if self.flags.contains(RenderFlags::CHILDREN) {
            for child in &mut self.children {
                child.traverse(self.cascade, ctx)?;
            }
        }

        if self.flags.contains(RenderFlags::AFTER_CHILDREN) {
            if let Some(renderable) = self.renderable.as_mut() {
                renderable.after_children(&transform, ctx)?;
            }
        }

        Ok(())
    }
}

/// A root node plus the frame context that travels through it.
pub struct Scene<E> {
    root: SceneNode<E>,
    ctx: FrameContext,
}

impl<E> Scene<E> {
    /// A scene whose frame counter starts at zero.
    pub fn new(root: SceneNode<E>) -> Self {
        Self {
            root,
            ctx: FrameContext::new(),
        }
    }

    /// The root node.
    pub fn root(&self) -> &SceneNode<E> {
        &self.root
    }

    /// The root node, for adding or removing children.
    pub fn root_mut(&mut self) -> &mut SceneNode<E> {
        &mut self.root
    }

    /// State of the last rendered frame.
    pub fn context(&self) -> &FrameContext {
        &self.ctx
    }

    /// Renders one frame.
    pub fn render(&mut self, delta_time: f32) -> Result<(), E> {
        self.ctx.advance(delta_time);
        log::trace!("rendering frame {}", self.ctx.frame());
        self.root.traverse(Mat4::IDENTITY, &mut self.ctx)
    }
}
