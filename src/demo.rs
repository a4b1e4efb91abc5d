//! Greeter: the service served by the `traced-thrift` binary.
//!
//! ```text
//! service Greeter {
//!     string hello(1: string name)
//! }
//! ```

use crate::codec::{
    ApplicationException, ApplicationExceptionKind, CodecError, Decode, Decoder, Encode, Encoder,
    TType,
};
use crate::rpc::{Client, ClientError, Service, ServiceBuilder, ServiceError};
use crate::trace;
use tokio::io::{AsyncRead, AsyncWrite};

pub const SERVICE_NAME: &str = "Greeter";
pub const HELLO: &str = "hello";

/// Arguments of `hello`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelloArgs {
    pub name: String,
}

impl Encode for HelloArgs {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_struct(|e| {
            e.field(1, TType::String).write_string(&self.name);
        });
    }
}

impl Decode for HelloArgs {
    fn decode(decoder: &mut Decoder) -> Result<Self, CodecError> {
        let mut name = None;
        decoder.read_struct(|d, field| match (field.id, field.ttype) {
            (1, TType::String) => {
                name = Some(d.read_string()?);
                Ok(())
            }
            (_, ttype) => d.skip(ttype),
        })?;
        Ok(Self {
            name: name.ok_or(CodecError::MissingField {
                record: "HelloArgs",
                field: "name",
            })?,
        })
    }
}

/// Result of `hello`; `success` is field 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelloResult {
    pub success: Option<String>,
}

impl Encode for HelloResult {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_struct(|e| {
            if let Some(success) = &self.success {
                e.field(0, TType::String).write_string(success);
            }
        });
    }
}

impl Decode for HelloResult {
    fn decode(decoder: &mut Decoder) -> Result<Self, CodecError> {
        let mut success = None;
        decoder.read_struct(|d, field| match (field.id, field.ttype) {
            (0, TType::String) => {
                success = Some(d.read_string()?);
                Ok(())
            }
            (_, ttype) => d.skip(ttype),
        })?;
        Ok(Self { success })
    }
}

async fn hello(args: HelloArgs) -> Result<HelloResult, ApplicationException> {
    tracing::debug!(
        caller = %trace::caller().unwrap_or_default(),
        trace = ?trace::current().map(|id| id.to_string()),
        "hello"
    );
    Ok(HelloResult {
        success: Some(format!("hello {}", args.name)),
    })
}

/// The Greeter service, optionally answering the trace upgrade.
pub fn greeter_service(with_upgrade: bool) -> Result<Service, ServiceError> {
    let builder = ServiceBuilder::new(SERVICE_NAME).method(HELLO, hello)?;
    let builder = if with_upgrade {
        builder.with_upgrade_responder()?
    } else {
        builder
    };
    Ok(builder.build())
}

/// Typed `hello` call.
pub async fn call_hello<S>(client: &Client<S>, name: &str) -> Result<String, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let args = HelloArgs {
        name: name.to_string(),
    };
    let result: HelloResult = client.call(HELLO, &args).await?;
    result.success.ok_or_else(|| {
        ClientError::Application(ApplicationException::new(
            ApplicationExceptionKind::MissingResult,
            "hello failed: unknown result",
        ))
    })
}
