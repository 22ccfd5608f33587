//! Instance mapping pipeline.
//!
//! An instance exists in three forms:
//!
//! - **wire** ([`UntypedInstance`]): a flat map from attribute-id strings
//!   to strings, string arrays, id-tuple arrays or nested untyped
//!   instances. Everything the server sends or accepts.
//! - **typed** ([`ParsedInstance`] / [`EncryptedParsedInstance`]): values
//!   decoded against the type model, keyed by attribute id. The encrypted
//!   variant still carries ciphertext in its encrypted fields.
//! - **application** ([`AppInstance`]): field-name keyed typed values,
//!   with cardinality flattened, the form the rest of the system works on.
//!
//! [`InstancePipeline`] composes the three mappers. Incoming data is
//! interpreted under the server model set, outgoing data under the client
//! model set; the sealed [`Shape`] markers keep the two typed forms from
//! mixing at compile time.

mod codec;
mod crypto_mapper;
mod error;
mod instance;
mod model_mapper;
mod pipeline;
mod type_mapper;

pub use crypto_mapper::CryptoMapper;
pub use error::{PipelineError, PipelineResult};
pub use instance::{
    AppInstance, AppValue, ClientShape, EncryptedParsedInstance, InstanceValues, ParsedInstance,
    ParsedValue, ServerShape, Shape, UntypedInstance, UntypedValue,
};
pub use model_mapper::ModelMapper;
pub use pipeline::{InstancePipeline, ModelSide};
pub use type_mapper::TypeMapper;
