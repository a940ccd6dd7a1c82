//! Error types for the simulation harness.
//!
//! Every fallible harness operation returns [`SimResult`]. The aggregate
//! [`SimError`] wraps four focused families, each modelling one class of
//! failure:
//!
//! * [`ConfigurationError`] - bad platform/device index, invalid geometry,
//!   mismatched buffer sizes, unreadable kernel source.
//! * [`CompileError`] - kernel source failed to build; carries the backend's
//!   build log verbatim.
//! * [`BackendError`] - an enqueue, buffer or readback operation was rejected
//!   by the compute backend.
//! * [`StateError`] - an operation was invoked before its required prior
//!   state (e.g. `run_update` before `run_init`).
//!
//! ## Fatality
//! Configuration and compile errors indicate programmer or environment
//! error, not transient conditions. [`SimError::is_fatal`] reports them as
//! such; binaries terminate on them. Backend and state errors are ordinary
//! values the caller may recover from.
//!
//! ## Display vs. Debug
//! * [`fmt::Display`] is short and suitable for logs. A compile error's
//!   display is the full build log.
//! * [`fmt::Debug`] (derived) retains full structure for diagnostics.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

use crate::engine::types::StageKind;


/// Result alias used across the harness.
pub type SimResult<T> = Result<T, SimError>;

/// Returned when the caller supplies a configuration the harness or the
/// backend cannot honour.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {

    /// The requested platform index does not exist.
    PlatformOutOfRange {
        /// Requested index.
        index: usize,

        /// Number of platforms available.
        available: usize,
    },

    /// The requested device index does not exist on the selected platform.
    DeviceOutOfRange {
        /// Requested index.
        index: usize,

        /// Number of devices on the platform.
        available: usize,
    },

    /// Geometry dimension count outside `1..=2`.
    Dimensions {
        /// Requested dimension count.
        dims: usize,
    },

    /// A used axis has a zero global or local extent.
    ZeroExtent {
        /// Offending axis (0 = x).
        axis: usize,
    },

    /// Global extent is not an exact multiple of the local extent.
    IndivisibleExtent {
        /// Offending axis (0 = x).
        axis: usize,

        /// Global extent along the axis.
        global: u32,

        /// Local extent along the axis.
        local: u32,
    },

    /// The product of local extents exceeds the backend work-group limit.
    WorkGroupTooLarge {
        /// Requested invocations per work-group.
        requested: u64,

        /// Backend-reported maximum.
        max: u32,
    },

    /// A single local extent exceeds the backend's per-axis limit.
    LocalExtentTooLarge {
        /// Offending axis (0 = x).
        axis: usize,

        /// Requested extent.
        local: u32,

        /// Backend-reported maximum.
        max: u32,
    },

    /// The number of work-groups along an axis exceeds the backend limit.
    TooManyWorkGroups {
        /// Offending axis (0 = x).
        axis: usize,

        /// Work-groups required along the axis.
        groups: u32,

        /// Backend-reported maximum.
        max: u32,
    },

    /// Local scratch exceeds the backend's work-group storage limit.
    ScratchTooLarge {
        /// Requested scratch in bytes.
        requested: u64,

        /// Backend-reported maximum in bytes.
        max: u64,
    },

    /// A state layout or output size of zero bytes was requested.
    EmptyBuffer {
        /// Which buffer was empty.
        what: &'static str,
    },

    /// The caller's host buffer is smaller than the configured output.
    HostBufferTooSmall {
        /// Configured output size in bytes.
        required: usize,

        /// Bytes provided by the caller.
        provided: usize,
    },

    /// Kernel source could not be read from disk.
    KernelSource {
        /// Path that was opened.
        path: PathBuf,

        /// I/O failure description.
        message: String,
    },

    /// The requested backend was not compiled into this build.
    BackendUnavailable {
        /// Backend name.
        backend: &'static str,
    },

    /// A configuration file could not be read or parsed.
    ConfigFile {
        /// Path that was opened.
        path: PathBuf,

        /// Failure description.
        message: String,
    },

    /// A model parameter the kernels cannot represent.
    InvalidParameter {
        /// Parameter name.
        name: &'static str,

        /// Why it was rejected.
        message: String,
    },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::PlatformOutOfRange { index, available } => write!(
                f,
                "selected platform {index} is out of range ({available} available)"
            ),
            ConfigurationError::DeviceOutOfRange { index, available } => write!(
                f,
                "selected device {index} is out of range ({available} available)"
            ),
            ConfigurationError::Dimensions { dims } => {
                write!(f, "geometry must have 1 or 2 dimensions, got {dims}")
            }
            ConfigurationError::ZeroExtent { axis } => {
                write!(f, "zero extent on axis {axis}")
            }
            ConfigurationError::IndivisibleExtent { axis, global, local } => write!(
                f,
                "global extent {global} on axis {axis} is not divisible by local extent {local}"
            ),
            ConfigurationError::WorkGroupTooLarge { requested, max } => write!(
                f,
                "work-group of {requested} invocations exceeds device maximum {max}"
            ),
            ConfigurationError::LocalExtentTooLarge { axis, local, max } => write!(
                f,
                "local extent {local} on axis {axis} exceeds device maximum {max}"
            ),
            ConfigurationError::TooManyWorkGroups { axis, groups, max } => write!(
                f,
                "{groups} work-groups on axis {axis} exceed device maximum {max}"
            ),
            ConfigurationError::ScratchTooLarge { requested, max } => write!(
                f,
                "local scratch of {requested} bytes exceeds device maximum {max}"
            ),
            ConfigurationError::EmptyBuffer { what } => {
                write!(f, "{what} must not be empty")
            }
            ConfigurationError::HostBufferTooSmall { required, provided } => write!(
                f,
                "host buffer of {provided} bytes is smaller than the {required} byte output"
            ),
            ConfigurationError::KernelSource { path, message } => write!(
                f,
                "couldn't read kernel source {}: {message}",
                path.display()
            ),
            ConfigurationError::BackendUnavailable { backend } => write!(
                f,
                "backend `{backend}` is not available in this build"
            ),
            ConfigurationError::ConfigFile { path, message } => write!(
                f,
                "couldn't load configuration {}: {message}",
                path.display()
            ),
            ConfigurationError::InvalidParameter { name, message } => {
                write!(f, "invalid `{name}`: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Returned when kernel source fails to build.
///
/// `log` is the backend's diagnostic text, kept verbatim: it is the primary
/// tool for debugging kernel source.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {

    /// Full build log reported by the backend.
    pub log: String,
}

impl CompileError {
    /// Wraps a build log.
    pub fn new(log: impl Into<String>) -> Self {
        Self { log: log.into() }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.log)
    }
}

impl std::error::Error for CompileError {}

/// Returned when the backend rejects an operation.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {

    /// Harness operation that failed (e.g. `"enqueue update kernel"`).
    pub operation: &'static str,

    /// Backend-provided detail.
    pub message: Cow<'static, str>,
}

impl BackendError {
    /// Builds a backend error for `operation`.
    pub fn new(operation: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self { operation, message: message.into() }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "couldn't {}: {}", self.operation, self.message)
    }
}

impl std::error::Error for BackendError {}

/// Returned when an operation is issued out of protocol order.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {

    /// No program has been loaded into the instance.
    NoProgram,

    /// `run_update` or `run_meas` was called before any `run_init`.
    NotInitialized {
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// The stage was run without ever being configured.
    StageNotConfigured {
        /// Stage that lacks a configuration.
        stage: StageKind,
    },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::NoProgram => f.write_str("no program loaded"),
            StateError::NotInitialized { operation } => {
                write!(f, "{operation} called before run_init")
            }
            StateError::StageNotConfigured { stage } => {
                write!(f, "{stage} stage has not been configured")
            }
        }
    }
}

impl std::error::Error for StateError {}

/// Aggregate harness error.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {

    /// Invalid configuration supplied by the caller.
    Configuration(ConfigurationError),

    /// Kernel source failed to build.
    Compile(CompileError),

    /// The backend rejected an operation.
    Backend(BackendError),

    /// Operation issued out of protocol order.
    State(StateError),
}

impl SimError {
    /// `true` for errors that indicate programmer or environment error.
    ///
    /// Callers keeping the fail-fast posture terminate on these; backend and
    /// state errors leave the instance usable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SimError::Configuration(_) | SimError::Compile(_))
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::Configuration(e) => write!(f, "configuration error: {e}"),
            SimError::Compile(e) => write!(f, "compile error:\n{e}"),
            SimError::Backend(e) => write!(f, "backend error: {e}"),
            SimError::State(e) => write!(f, "state error: {e}"),
        }
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimError::Configuration(e) => Some(e),
            SimError::Compile(e) => Some(e),
            SimError::Backend(e) => Some(e),
            SimError::State(e) => Some(e),
        }
    }
}

impl From<ConfigurationError> for SimError {
    fn from(e: ConfigurationError) -> Self { SimError::Configuration(e) }
}

impl From<CompileError> for SimError {
    fn from(e: CompileError) -> Self { SimError::Compile(e) }
}

impl From<BackendError> for SimError {
    fn from(e: BackendError) -> Self { SimError::Backend(e) }
}

impl From<StateError> for SimError {
    fn from(e: StateError) -> Self { SimError::State(e) }
}
