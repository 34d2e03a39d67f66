use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::error::{ContentError, Result};
use crate::payload::{self, AssetKind, Dispose, Payload, Resource};
use crate::tracker::Shared;

/// Produces asset objects for the tracker.
///
/// A reader is invoked on a cache miss with the requested name and type. It
/// may load further assets through [`ReadContext::load`]; those loads are
/// recorded as dependencies of the asset being read. Sub-resources created
/// along the way are handed over with [`ReadContext::track_disposable`] and
/// are disposed together with the asset.
pub trait AssetReader: Send + Sync {
    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Payload>;
}

impl<R: AssetReader + ?Sized> AssetReader for Arc<R> {
    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Payload> {
        (**self).read(ctx)
    }
}

impl<R: AssetReader + ?Sized> AssetReader for Box<R> {
    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Payload> {
        (**self).read(ctx)
    }
}

/// State of one read in progress.
pub struct ReadContext<'a> {
    shared: &'a Shared,
    name: &'a str,
    kind: AssetKind,
    resources: Vec<Resource>,
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(shared: &'a Shared, name: &'a str, kind: AssetKind) -> Self {
        Self {
            shared,
            name,
            kind,
            resources: Vec::new(),
        }
    }

    /// Name of the asset being read.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Type the asset was requested as.
    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    /// Directory relative asset names resolve against.
    pub fn root_directory(&self) -> &Path {
        self.shared.root_directory()
    }

    /// Hands ownership of a sub-resource to the asset being read.
    pub fn track_disposable<T: Dispose + 'static>(&mut self, resource: Arc<T>) {
        self.resources.push(Resource::new(resource));
    }

    /// Loads another asset as a dependency of the one being read.
    pub fn load<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let payload = self.shared.load_kind(name, AssetKind::of::<T>())?;
        payload::typed(name, &payload)
    }

    pub fn load_kind(&self, name: &str, kind: AssetKind) -> Result<Payload> {
        self.shared.load_kind(name, kind)
    }

    pub(crate) fn into_resources(self) -> Vec<Resource> {
        self.resources
    }
}

type DecodeFn = dyn Fn(&[u8], &mut ReadContext<'_>) -> anyhow::Result<Payload> + Send + Sync;

struct Decoder {
    extension: String,
    decode: Box<DecodeFn>,
}

/// Reader that maps an asset name to `<root>/<name>.<extension>` and decodes
/// the file with the decoder registered for the requested type.
///
/// The reader knows no file formats itself; callers register one decoder per
/// payload type.
pub struct DirectoryReader {
    root: PathBuf,
    decoders: HashMap<AssetKind, Decoder>,
}

impl DirectoryReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            decoders: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registers the decoder for assets requested as `T`.
    pub fn with_decoder<T, F>(self, extension: &str, decode: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&[u8], &mut ReadContext<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.with_payload_decoder(
            AssetKind::of::<T>(),
            extension,
            move |bytes: &[u8], ctx: &mut ReadContext<'_>| decode(bytes, ctx).map(Payload::new),
        )
    }

    /// Registers a decoder that builds the payload itself, e.g. to make it
    /// disposable.
    pub fn with_payload_decoder<F>(mut self, kind: AssetKind, extension: &str, decode: F) -> Self
    where
        F: Fn(&[u8], &mut ReadContext<'_>) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        self.decoders.insert(
            kind,
            Decoder {
                extension: extension.trim_start_matches('.').to_string(),
                decode: Box::new(decode),
            },
        );
        self
    }

    /// Location of the compiled file for `name` with the given extension.
    pub fn path_for(&self, name: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{name}.{extension}"))
    }
}

impl AssetReader for DirectoryReader {
    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Payload> {
        let name = ctx.name().to_string();
        let decoder = self.decoders.get(&ctx.kind()).ok_or_else(|| {
            ContentError::read(
                &name,
                anyhow::anyhow!("no decoder registered for {}", ctx.kind().name()),
            )
        })?;

        let path = self.path_for(&name, &decoder.extension);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ContentError::not_found(name));
            }
            Err(err) => {
                return Err(ContentError::read(
                    &name,
                    anyhow::Error::new(err).context(format!("unable to read {}", path.display())),
                ));
            }
        };

        (decoder.decode)(&bytes, ctx)
            .with_context(|| format!("unable to decode {}", path.display()))
            // failures of nested loads come back as they were raised
            .map_err(|err| match err.downcast::<ContentError>() {
                Ok(content) => content,
                Err(err) => ContentError::read(&name, err),
            })
    }
}
