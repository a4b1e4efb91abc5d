//! Service definitions: typed method registration and routing.
//!
//! # Responsibilities
//! - Own the method table of one service
//! - Erase typed handlers into decode-then-run closures
//! - Register the reserved upgrade method as an explicit builder step
//!
//! # Design Decisions
//! - Registration errors surface at construction, never at dispatch time
//! - The upgrade method is not a table entry: the server answers it itself,
//!   since its handler must touch connection state

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;

use crate::codec::{ApplicationException, CodecError, Decode, Decoder, Encode};
use crate::protocol::UPGRADE_METHOD;

/// Reply body produced by a handler.
pub type Reply = Box<dyn Encode + Send + Sync>;

/// Future returned by an erased handler.
pub type HandlerFuture = BoxFuture<'static, Result<Reply, ApplicationException>>;

/// A handler with its argument type erased.
///
/// Decoding runs synchronously against the request frame; only the returned
/// future suspends.
pub type ErasedHandler =
    Arc<dyn Fn(&mut Decoder) -> Result<HandlerFuture, CodecError> + Send + Sync>;

/// Registration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("method '{method}' registered twice on service '{service}'")]
    DuplicateMethod { service: String, method: String },

    #[error("method name '{0}' is reserved for the trace upgrade")]
    ReservedMethod(String),
}

/// Where an incoming call goes.
pub enum Route<'a> {
    Method(&'a ErasedHandler),
    Upgrade,
    Unknown,
}

/// Builds a [`Service`] one method at a time.
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, ErasedHandler>,
    upgrade: bool,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
            upgrade: false,
        }
    }

    /// Register `handler` under `name`.
    ///
    /// `A` is the argument struct decoded from the request body, `R` the
    /// result struct encoded into the reply body.
    pub fn method<A, R, F, Fut>(mut self, name: &str, handler: F) -> Result<Self, ServiceError>
    where
        A: Decode + Send + 'static,
        R: Encode + Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ApplicationException>> + Send + 'static,
    {
        if self.upgrade && name == UPGRADE_METHOD {
            return Err(ServiceError::ReservedMethod(name.to_string()));
        }
        if self.methods.contains_key(name) {
            return Err(ServiceError::DuplicateMethod {
                service: self.name.clone(),
                method: name.to_string(),
            });
        }

        let erased: ErasedHandler = Arc::new(move |decoder: &mut Decoder| {
            let args = A::decode(decoder)?;
            let fut = handler(args);
            Ok(async move { fut.await.map(|reply| Box::new(reply) as Reply) }.boxed())
        });
        self.methods.insert(name.to_string(), erased);
        Ok(self)
    }

    /// Answer the upgrade probe on every connection of this service.
    ///
    /// Attaching twice is a no-op.
    pub fn with_upgrade_responder(mut self) -> Result<Self, ServiceError> {
        if self.methods.contains_key(UPGRADE_METHOD) {
            return Err(ServiceError::ReservedMethod(UPGRADE_METHOD.to_string()));
        }
        self.upgrade = true;
        Ok(self)
    }

    pub fn build(self) -> Service {
        tracing::debug!(
            service = %self.name,
            methods = self.methods.len(),
            upgrade = self.upgrade,
            "Service built"
        );
        Service {
            name: self.name,
            methods: self.methods,
            upgrade: self.upgrade,
        }
    }
}

/// An immutable method table.
pub struct Service {
    name: String,
    methods: HashMap<String, ErasedHandler>,
    upgrade: bool,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supports_upgrade(&self) -> bool {
        self.upgrade
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn route(&self, method: &str) -> Route<'_> {
        if self.upgrade && method == UPGRADE_METHOD {
            return Route::Upgrade;
        }
        match self.methods.get(method) {
            Some(handler) => Route::Method(handler),
            None => Route::Unknown,
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .field("upgrade", &self.upgrade)
            .finish()
    }
}
