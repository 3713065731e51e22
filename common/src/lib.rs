pub mod config;
pub mod error;
pub mod network;
pub mod sampler;
pub mod sensor;
pub mod session;
pub mod telemetry;
pub mod types;
pub mod wire;

pub use config::{AgentConfig, ConnectPolicy, NetworkConfig, SensorHardwareConfig, SensorModel};
pub use error::{NetworkError, SensorError, TransportError};
pub use network::{connect, Credentials, NetworkSession};
pub use sampler::{LoopStats, SampleTimer, SamplingLoop, TickOutcome, TimerState};
pub use sensor::{SensorDriver, SensorReader};
pub use session::{
    validate_payload, AverageSummarizer, MachineSession, RecordOutcome, SessionKey, SessionLog,
    SessionLogEntry, Summarizer,
};
pub use telemetry::{HttpTransport, TelemetryClient};
pub use types::{ConnectionState, HttpResponse, Reading};
pub use wire::*;
