use std::any::{self, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{ContentError, Result};

/// Explicit release for objects that hold more than memory (GPU buffers,
/// file handles, audio voices).
///
/// Payloads and owned sub-resources are shared through `Arc`, so disposal
/// takes `&self` and implementations use interior mutability.
pub trait Dispose: Send + Sync {
    fn dispose(&self);
}

/// Runtime tag for the type an asset is requested as.
#[derive(Clone, Copy)]
pub struct AssetKind {
    id: TypeId,
    name: &'static str,
}

impl AssetKind {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }

    pub fn id(self) -> TypeId {
        self.id
    }

    /// Full type path, as reported by `std::any::type_name`.
    pub fn name(self) -> &'static str {
        self.name
    }

    /// Type name without its module path.
    pub fn short_name(self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for AssetKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AssetKind {}

impl Hash for AssetKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A loaded asset object with its type tag.
///
/// Cloning is cheap and keeps pointing at the same object; identity
/// comparisons use the address of the shared allocation.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    kind: AssetKind,
    disposer: Option<Arc<dyn Dispose>>,
}

impl Payload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            kind: AssetKind::of::<T>(),
            disposer: None,
        }
    }

    /// Wraps a value whose `Dispose` implementation runs when the owning
    /// handle is disposed.
    pub fn disposable<T: Any + Dispose>(value: T) -> Self {
        Self::disposable_arc(Arc::new(value))
    }

    pub fn disposable_arc<T: Any + Dispose>(value: Arc<T>) -> Self {
        let disposer: Arc<dyn Dispose> = value.clone();
        Self {
            value,
            kind: AssetKind::of::<T>(),
            disposer: Some(disposer),
        }
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn is<T: Any>(&self) -> bool {
        self.kind.id == TypeId::of::<T>()
    }

    pub fn is_disposable(&self) -> bool {
        self.disposer.is_some()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// True when both payloads wrap the same object.
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        self.addr() == other.addr()
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.value) as *const () as usize
    }

    pub(crate) fn dispose(&self) {
        if let Some(disposer) = &self.disposer {
            disposer.dispose();
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("kind", &self.kind)
            .field("addr", &format_args!("{:#x}", self.addr()))
            .finish()
    }
}

/// Casts a payload loaded under `name` to the requested type.
pub(crate) fn typed<T: Any + Send + Sync>(name: &str, payload: &Payload) -> Result<Arc<T>> {
    payload
        .downcast::<T>()
        .ok_or_else(|| ContentError::type_mismatch(name, AssetKind::of::<T>(), payload.kind()))
}

/// Address used to match owned resources against loaded payloads.
pub(crate) fn arc_addr<T: ?Sized>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}

/// A disposable sub-resource created while reading an asset and owned by its
/// handle.
#[derive(Clone)]
pub struct Resource {
    addr: usize,
    inner: Arc<dyn Dispose>,
}

impl Resource {
    pub fn new<T: Dispose + 'static>(value: Arc<T>) -> Self {
        Self {
            addr: arc_addr(&value),
            inner: value,
        }
    }

    pub(crate) fn addr(&self) -> usize {
        self.addr
    }

    pub(crate) fn dispose(&self) {
        self.inner.dispose();
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource({:#x})", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Buffer {
        disposed: AtomicBool,
    }

    impl Dispose for Buffer {
        fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn downcast_checks_type_tag() {
        let payload = Payload::new(String::from("hello"));
        assert!(payload.is::<String>());
        assert_eq!(payload.downcast::<String>().as_deref().map(String::as_str), Some("hello"));
        assert!(payload.downcast::<u32>().is_none());
        assert_eq!(payload.kind(), AssetKind::of::<String>());
        assert_eq!(payload.kind().short_name(), "String");
    }

    #[test]
    fn typed_reports_mismatch() {
        let payload = Payload::new(7_u32);
        let err = typed::<String>("Counter", &payload).unwrap_err();
        match err {
            ContentError::TypeMismatch { name, found, .. } => {
                assert_eq!(name, "Counter");
                assert_eq!(found, "u32");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn disposable_payload_runs_dispose() {
        let buffer = Arc::new(Buffer::default());
        let payload = Payload::disposable_arc(Arc::clone(&buffer));
        assert!(payload.is_disposable());
        payload.dispose();
        assert!(buffer.disposed.load(Ordering::SeqCst));

        let plain = Payload::new(Buffer::default());
        assert!(!plain.is_disposable());
    }

    #[test]
    fn identity_follows_shared_allocation() {
        let buffer = Arc::new(Buffer::default());
        let payload = Payload::disposable_arc(Arc::clone(&buffer));
        let resource = Resource::new(Arc::clone(&buffer));
        assert_eq!(payload.addr(), resource.addr());
        assert!(payload.ptr_eq(&payload.clone()));
        assert!(!payload.ptr_eq(&Payload::new(Buffer::default())));
    }
}
