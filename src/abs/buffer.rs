//! GPU buffers.
//!
//! A [`Buffer`] owns one buffer object together with the layout of the
//! elements stored in it, so vertex counts and attribute pointers can be
//! derived from the buffer itself. Buffers are usually shared between
//! render units through `Rc`; the last owner deletes the native object.

use std::ptr::NonNull;

use bitflags::bitflags;
use bytemuck::Pod;

use crate::abs::{BindTarget, BufferData, Gl, ObjectKind, RawHandle, ResourceHandle};
use crate::error::{ErrorCode, GlError, Result};

/// Binding point a buffer is created on and bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Array,
    ElementArray,
    Uniform,
    ShaderStorage,
    TransformFeedback,
}

impl BufferTarget {
    /// The GL target enumerant.
    pub fn gl(self) -> u32 {
        match self {
            BufferTarget::Array => glow::ARRAY_BUFFER,
            BufferTarget::ElementArray => glow::ELEMENT_ARRAY_BUFFER,
            BufferTarget::Uniform => glow::UNIFORM_BUFFER,
            BufferTarget::ShaderStorage => glow::SHADER_STORAGE_BUFFER,
            BufferTarget::TransformFeedback => glow::TRANSFORM_FEEDBACK_BUFFER,
        }
    }

    /// The binding point as a [`BindTarget`].
    pub fn bind_target(self) -> BindTarget {
        BindTarget::Buffer(self.gl())
    }
}

/// Usage hint passed to `glBufferData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    StaticDraw,
    DynamicDraw,
    StreamDraw,
    StaticCopy,
    DynamicCopy,
    StreamCopy,
}

impl BufferUsage {
    /// The GL usage enumerant.
    pub fn gl(self) -> u32 {
        match self {
            BufferUsage::StaticDraw => glow::STATIC_DRAW,
            BufferUsage::DynamicDraw => glow::DYNAMIC_DRAW,
            BufferUsage::StreamDraw => glow::STREAM_DRAW,
            BufferUsage::StaticCopy => glow::STATIC_COPY,
            BufferUsage::DynamicCopy => glow::DYNAMIC_COPY,
            BufferUsage::StreamCopy => glow::STREAM_COPY,
        }
    }
}

/// Scalar type of a vertex component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    F32,
    I32,
    U32,
}

impl ComponentType {
    /// The GL type enumerant.
    pub fn gl(self) -> u32 {
        match self {
            ComponentType::F32 => glow::FLOAT,
            ComponentType::I32 => glow::INT,
            ComponentType::U32 => glow::UNSIGNED_INT,
        }
    }

    /// Bytes per component.
    pub fn size(self) -> usize {
        4
    }
}

/// Layout of one element of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexFormat {
    /// 1 to 4.
    pub components: i32,
    pub component_type: ComponentType,
    pub normalized: bool,
}

impl VertexFormat {
    /// One `f32`.
    pub const FLOAT: Self = Self::float(1);
    /// Two `f32`s.
    pub const VEC2: Self = Self::float(2);
    /// Three `f32`s.
    pub const VEC3: Self = Self::float(3);
    /// Four `f32`s.
    pub const VEC4: Self = Self::float(4);
    /// One `u32` index.
    pub const INDEX: Self = Self {
        components: 1,
        component_type: ComponentType::U32,
        normalized: false,
    };

    /// `components` unnormalised `f32`s.
    pub const fn float(components: i32) -> Self {
        Self {
            components,
            component_type: ComponentType::F32,
            normalized: false,
        }
    }

    /// Bytes per element.
    pub fn stride(&self) -> usize {
        self.components as usize * self.component_type.size()
    }
}

bitflags! {
    /// `glMapBufferRange` access bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MapAccess: u32 {
        const READ              = glow::MAP_READ_BIT;
        const WRITE             = glow::MAP_WRITE_BIT;
        const INVALIDATE_RANGE  = glow::MAP_INVALIDATE_RANGE_BIT;
        const INVALIDATE_BUFFER = glow::MAP_INVALIDATE_BUFFER_BIT;
        const FLUSH_EXPLICIT    = glow::MAP_FLUSH_EXPLICIT_BIT;
        const UNSYNCHRONIZED    = glow::MAP_UNSYNCHRONIZED_BIT;
    }
}

/// A buffer object and the layout of its elements.
#[derive(Debug)]
pub struct Buffer {
    handle: ResourceHandle,
    target: BufferTarget,
    usage: BufferUsage,
    format: VertexFormat,
    len: usize,
}

impl Buffer {
    /// Creates a buffer holding `data`.
    pub fn new<T: Pod>(
        gl: &Gl,
        target: BufferTarget,
        format: VertexFormat,
        data: &[T],
        usage: BufferUsage,
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let len = element_count(bytes.len(), format)?;
        Self::allocate(gl, target, format, usage, BufferData::Bytes(bytes), len)
    }

    /// Creates a buffer with room for `len` elements and undefined contents.
    pub fn with_len(
        gl: &Gl,
        target: BufferTarget,
        format: VertexFormat,
        len: usize,
        usage: BufferUsage,
    ) -> Result<Self> {
        let size = len * format.stride();
        Self::allocate(gl, target, format, usage, BufferData::Size(size), len)
    }

    /// A static vertex buffer.
    pub fn vertices<T: Pod>(gl: &Gl, format: VertexFormat, data: &[T]) -> Result<Self> {
        Self::new(gl, BufferTarget::Array, format, data, BufferUsage::StaticDraw)
    }

    /// A static `u32` index buffer.
    pub fn indices(gl: &Gl, indices: &[u32]) -> Result<Self> {
        Self::new(
            gl,
            BufferTarget::ElementArray,
            VertexFormat::INDEX,
            indices,
            BufferUsage::StaticDraw,
        )
    }

    fn allocate(
        gl: &Gl,
        target: BufferTarget,
        format: VertexFormat,
        usage: BufferUsage,
        data: BufferData<'_>,
        len: usize,
    ) -> Result<Self> {
        let handle = ResourceHandle::create(gl, ObjectKind::Buffer)?;
        handle.bind(target.bind_target())?;
        gl.buffer_data(target.gl(), data, usage.gl());
        let uploaded = gl.check("glBufferData", || {
            format!("0x{:04X}, {} bytes, 0x{:04X}", target.gl(), len * format.stride(), usage.gl())
        });
        handle.unbind(target.bind_target())?;
        uploaded?;

        log::debug!(
            "buffer {} holds {len} x {:?} ({:?})",
            handle.raw(),
            format,
            usage
        );
        Ok(Self {
            handle,
            target,
            usage,
            format,
            len,
        })
    }

    /// The native name, or `UseAfterDestroy`.
    pub fn id(&self) -> Result<RawHandle> {
        self.handle.id()
    }

    /// The native name; `0` once destroyed.
    pub fn raw(&self) -> RawHandle {
        self.handle.raw()
    }

    /// The target this buffer binds to.
    pub fn target(&self) -> BufferTarget {
        self.target
    }

    /// The usage hint it was created with.
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Layout of one element.
    pub fn format(&self) -> VertexFormat {
        self.format
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the storage in bytes.
    pub fn size_bytes(&self) -> usize {
        self.len * self.format.stride()
    }

    /// The context the buffer belongs to.
    pub fn gl(&self) -> &Gl {
        self.handle.gl()
    }

    /// Binds to this buffer's own target.
    pub fn bind(&self) -> Result<()> {
        self.handle.bind(self.target.bind_target())
    }

    /// Restores the default buffer on this buffer's target.
    pub fn unbind(&self) -> Result<()> {
        self.handle.unbind(self.target.bind_target())
    }

    /// Binds to an indexed binding point such as a uniform block or a
    /// storage block. Passing this buffer's target is not required.
    pub fn bind_base(&self, target: BufferTarget, index: u32) -> Result<()> {
        let id = self.handle.id()?;
        self.gl().bind_buffer_base(target.gl(), index, id);
        Ok(())
    }

    /// Replaces elements starting at element `first`.
    pub fn update<T: Pod>(&self, first: usize, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let count = element_count(bytes.len(), self.format)?;
        self.check_range(first, count)?;

        self.bind()?;
        let offset = first * self.format.stride();
        self.gl().buffer_sub_data(self.target.gl(), offset, bytes);
        let result = self.gl().check("glBufferSubData", || {
            format!("0x{:04X}, {offset}, {} bytes", self.target.gl(), bytes.len())
        });
        self.unbind()?;
        result
    }

    /// Maps `count` elements starting at `first` for CPU access.
    ///
    /// Blocks until the GPU is done with the buffer, unless
    /// [`MapAccess::UNSYNCHRONIZED`] is requested. The range is unmapped when
    /// the returned guard is dropped or [`MappedRange::unmap`]ped.
    pub fn map_range(&self, first: usize, count: usize, access: MapAccess) -> Result<MappedRange<'_>> {
        self.check_range(first, count)?;
        if !access.intersects(MapAccess::READ | MapAccess::WRITE) {
            return Err(GlError::InvalidArgument(
                "buffer mapping needs READ or WRITE access".to_string(),
            ));
        }

        let offset = first * self.format.stride();
        let length = count * self.format.stride();
        self.bind()?;
        let ptr = self
            .gl()
            .map_buffer_range(self.target.gl(), offset, length, access.bits());
        self.unbind()?;

        let Some(ptr) = NonNull::new(ptr) else {
            self.gl().clear_errors();
            return Err(GlError::NativeCall {
                call: "glMapBufferRange",
                args: format!("0x{:04X}, {offset}, {length}, 0x{:X}", self.target.gl(), access.bits()),
                code: ErrorCode(glow::INVALID_OPERATION),
            });
        };

        Ok(MappedRange {
            buffer: self,
            ptr,
            len: length,
            mapped: true,
        })
    }

    /// Deletes the buffer object. Later operations fail.
    pub fn destroy(&mut self) {
        self.handle.destroy();
    }

    fn check_range(&self, first: usize, count: usize) -> Result<()> {
        if first + count > self.len {
            return Err(GlError::InvalidArgument(format!(
                "elements {first}..{} are outside a buffer of {} elements",
                first + count,
                self.len
            )));
        }
        Ok(())
    }
}

fn element_count(bytes: usize, format: VertexFormat) -> Result<usize> {
    let stride = format.stride();
    if stride == 0 || bytes % stride != 0 {
        return Err(GlError::InvalidArgument(format!(
            "{bytes} bytes is not a whole number of {stride}-byte elements"
        )));
    }
    Ok(bytes / stride)
}

/// CPU view of a mapped buffer range.
pub struct MappedRange<'a> {
    buffer: &'a Buffer,
    ptr: NonNull<u8>,
    len: usize,
    mapped: bool,
}

impl MappedRange<'_> {
    /// Mapped bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The mapped bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: the driver guarantees `len` bytes at `ptr` until unmap,
        // and unmapping needs `self` by value or drops it.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Copies `values` to the start of the range.
    pub fn write<T: Pod>(&mut self, values: &[T]) -> Result<()> {
        let src: &[u8] = bytemuck::cast_slice(values);
        if src.len() > self.len {
            return Err(GlError::InvalidArgument(format!(
                "{} bytes do not fit a mapped range of {} bytes",
                src.len(),
                self.len
            )));
        }
        self.as_bytes_mut()[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Flushes the range back to the GPU.
    pub fn unmap(mut self) -> Result<()> {
        self.release()?;
        let target = self.buffer.target.gl();
        self.buffer
            .gl()
            .check("glUnmapBuffer", || format!("0x{target:04X}"))
    }

    fn release(&mut self) -> Result<()> {
        if !self.mapped {
            return Ok(());
        }
        self.mapped = false;
        self.buffer.bind()?;
        self.buffer.gl().unmap_buffer(self.buffer.target.gl());
        self.buffer.unbind()
    }
}

impl Drop for MappedRange<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("failed to unmap buffer {}: {err}", self.buffer.raw());
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;
    use crate::abs::recording::{Call, RecordingApi};

    #[test]
    fn element_count_follows_format() {
        let (gl, _api) = RecordingApi::context();
        let data = [0.0f32; 12];
        assert_eq!(Buffer::vertices(&gl, VertexFormat::VEC3, &data).unwrap().len(), 4);
        assert_eq!(Buffer::vertices(&gl, VertexFormat::VEC4, &data).unwrap().len(), 3);
        assert!(matches!(
            Buffer::vertices(&gl, VertexFormat::VEC4, &[0.0f32; 6]),
            Err(GlError::InvalidArgument(_))
        ));
    }

    #[test]
    fn upload_is_bracketed_by_bind_and_unbind() {
        let (gl, api) = RecordingApi::context();
        let buffer = Buffer::vertices(&gl, VertexFormat::VEC2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let target = BindTarget::Buffer(glow::ARRAY_BUFFER);

        let calls: Vec<Call> = api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Bind { .. } | Call::BufferData { .. }))
            .collect();
        let data_at = calls
            .iter()
            .position(|c| matches!(c, Call::BufferData { size: 16, .. }))
            .unwrap();
        assert_eq!(
            calls[data_at - 1],
            Call::Bind {
                target,
                handle: buffer.raw()
            }
        );
        assert_eq!(calls[data_at + 1], Call::Bind { target, handle: 0 });
        assert_eq!(api.bound(target), 0);
    }

    #[test]
    fn update_rejects_out_of_range_writes() {
        let (gl, api) = RecordingApi::context();
        let buffer = Buffer::with_len(
            &gl,
            BufferTarget::Array,
            VertexFormat::FLOAT,
            4,
            BufferUsage::DynamicDraw,
        )
        .unwrap();

        buffer.update(2, &[1.0f32, 2.0]).unwrap();
        assert!(buffer.update(3, &[1.0f32, 2.0]).is_err());
        assert_eq!(api.count(|c| matches!(c, Call::BufferSubData { offset: 8, len: 8, .. })), 1);
    }

    #[test]
    fn mapped_range_writes_and_unmaps_on_drop() {
        let (gl, api) = RecordingApi::context();
        let buffer = Buffer::with_len(
            &gl,
            BufferTarget::Uniform,
            VertexFormat::VEC4,
            2,
            BufferUsage::DynamicCopy,
        )
        .unwrap();

        {
            let mut range = buffer
                .map_range(0, 2, MapAccess::WRITE | MapAccess::INVALIDATE_BUFFER)
                .unwrap();
            range.write(&[Vec4::ONE, Vec4::splat(2.0)]).unwrap();
            assert!(range.write(&[Vec4::ZERO; 3]).is_err());
        }

        assert_eq!(api.count(|c| matches!(c, Call::UnmapBuffer { .. })), 1);
        let floats: Vec<f32> = api
            .mapped_bytes()
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(floats, vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0]);
        assert!(matches!(
            api.calls().iter().find(|c| matches!(c, Call::MapBufferRange { .. })),
            Some(Call::MapBufferRange { offset: 0, length: 32, .. })
        ));
    }

    #[test]
    fn explicit_unmap_happens_once() {
        let (gl, api) = RecordingApi::context();
        let buffer = Buffer::with_len(
            &gl,
            BufferTarget::Array,
            VertexFormat::FLOAT,
            8,
            BufferUsage::StreamDraw,
        )
        .unwrap();
        buffer.map_range(4, 4, MapAccess::WRITE).unwrap().unmap().unwrap();
        assert_eq!(api.count(|c| matches!(c, Call::UnmapBuffer { .. })), 1);
    }

    #[test]
    fn failed_map_is_a_native_call_error() {
        let (gl, api) = RecordingApi::context();
        let buffer = Buffer::with_len(
            &gl,
            BufferTarget::Array,
            VertexFormat::FLOAT,
            8,
            BufferUsage::StreamDraw,
        )
        .unwrap();
        api.fail_next_map();
        assert!(matches!(
            buffer.map_range(0, 8, MapAccess::WRITE),
            Err(GlError::NativeCall {
                call: "glMapBufferRange",
                ..
            })
        ));
        assert!(buffer.map_range(0, 8, MapAccess::empty()).is_err());
    }

    #[test]
    fn bind_base_uses_indexed_target() {
        let (gl, api) = RecordingApi::context();
        let buffer = Buffer::with_len(
            &gl,
            BufferTarget::ShaderStorage,
            VertexFormat::VEC4,
            16,
            BufferUsage::DynamicCopy,
        )
        .unwrap();
        buffer.bind_base(BufferTarget::ShaderStorage, 3).unwrap();
        assert!(api.calls().contains(&Call::BindBufferBase {
            target: glow::SHADER_STORAGE_BUFFER,
            index: 3,
            buffer: buffer.raw(),
        }));
    }
}
