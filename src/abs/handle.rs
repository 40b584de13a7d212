//! Ownership of a single native object name.

use crate::abs::{BindTarget, Gl, ObjectKind, RawHandle};
use crate::error::{GlError, Result};

/// Owns one native object from allocation to deletion.
///
/// The handle is allocated in [`ResourceHandle::create`] and deleted at most
/// once, either by [`ResourceHandle::destroy`] or on drop. Every operation
/// after `destroy` fails with [`GlError::UseAfterDestroy`].
#[derive(Debug)]
pub struct ResourceHandle {
    gl: Gl,
    kind: ObjectKind,
    id: RawHandle,
    created: bool,
}

impl ResourceHandle {
    /// Allocates exactly one native object of `kind`.
    pub fn create(gl: &Gl, kind: ObjectKind) -> Result<Self> {
        let id = gl.generate(kind, 1).first().copied().unwrap_or(0);
        if id == 0 {
            log::error!("native API returned no {kind}");
            return Err(GlError::Allocation { kind });
        }
        if let Err(err) = gl.check("generate", || format!("{kind}, 1")) {
            gl.delete(kind, &[id]);
            return Err(err);
        }
        log::trace!("created {kind} {id}");

        Ok(Self {
            gl: gl.clone(),
            kind,
            id,
            created: true,
        })
    }

    /// The kind of object this handle owns.
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// The context the object belongs to.
    pub fn gl(&self) -> &Gl {
        &self.gl
    }

    /// Whether the object is still alive.
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// The native name, or `UseAfterDestroy`.
    pub fn id(&self) -> Result<RawHandle> {
        self.ensure_live()?;
        Ok(self.id)
    }

    /// The native name without the liveness check; `0` once destroyed.
    pub fn raw(&self) -> RawHandle {
        self.id
    }

    /// Makes the object current on `target`.
    pub fn bind(&self, target: BindTarget) -> Result<()> {
        self.ensure_live()?;
        self.gl.bind(target, self.id);
        Ok(())
    }

    /// Restores the default object on `target`.
    pub fn unbind(&self, target: BindTarget) -> Result<()> {
        self.ensure_live()?;
        self.gl.bind(target, 0);
        Ok(())
    }

    /// Deletes the native object. Calling this again does nothing.
    pub fn destroy(&mut self) {
        if !self.created {
            return;
        }
        self.gl.delete(self.kind, &[self.id]);
        log::trace!("destroyed {} {}", self.kind, self.id);
        self.created = false;
        self.id = 0;
    }

    fn ensure_live(&self) -> Result<()> {
        if self.created {
            Ok(())
        } else {
            Err(GlError::UseAfterDestroy { kind: self.kind })
        }
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}
