//! Per-session configuration.

use super::idle::IdleStatus;
use crate::error::{Error, Result};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Default size of a transport read buffer. Typical internet MTU = 1500,
/// rounded up to a power of 2.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;
/// Smallest read buffer a transport may shrink to.
pub const DEFAULT_MIN_READ_BUFFER_SIZE: usize = 64;
/// Largest read buffer a transport may grow to.
pub const DEFAULT_MAX_READ_BUFFER_SIZE: usize = 65536;
/// Default write timeout, in seconds.
pub const DEFAULT_WRITE_TIMEOUT: u32 = 60;
/// Default throughput calculation interval, in seconds.
pub const DEFAULT_THROUGHPUT_CALCULATION_INTERVAL: u32 = 3;

/// Transport-specific settings carried opaquely inside a [`SessionConfig`].
///
/// The owning service checks the concrete type against its transport
/// metadata and refuses mismatching configurations.
#[derive(Clone)]
pub struct TransportConfig {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl TransportConfig {
    /// Wraps a transport's own configuration value.
    pub fn new<C: Any + Send + Sync>(config: C) -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
            value: Arc::new(config),
        }
    }

    /// The wrapped value's type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The wrapped value's type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Downcasts to the transport's configuration type.
    pub fn downcast_ref<C: Any>(&self) -> Option<&C> {
        self.value.downcast_ref::<C>()
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("type", &self.type_name)
            .finish()
    }
}

/// Settings copied from the service onto each new session.
///
/// Idle times, the write timeout and the throughput interval are expressed in
/// seconds; `0` disables the corresponding feature.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    read_buffer_size: usize,
    min_read_buffer_size: usize,
    max_read_buffer_size: usize,

    idle_time_for_read: u32,
    idle_time_for_write: u32,
    idle_time_for_both: u32,

    write_timeout: u32,
    throughput_calculation_interval: u32,

    transport: Option<TransportConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            min_read_buffer_size: DEFAULT_MIN_READ_BUFFER_SIZE,
            max_read_buffer_size: DEFAULT_MAX_READ_BUFFER_SIZE,
            idle_time_for_read: 0,
            idle_time_for_write: 0,
            idle_time_for_both: 0,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            throughput_calculation_interval: DEFAULT_THROUGHPUT_CALCULATION_INTERVAL,
            transport: None,
        }
    }
}

impl SessionConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every setting from `other`.
    pub fn set_all(&mut self, other: &SessionConfig) -> &mut Self {
        *self = other.clone();
        self
    }

    /// Size of the buffer a transport allocates for each read.
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Sets the read buffer size. Must be non-zero.
    pub fn set_read_buffer_size(&mut self, size: usize) -> Result<&mut Self> {
        if size == 0 {
            return Err(Error::InvalidArgument(String::from(
                "read buffer size must be greater than 0",
            )));
        }
        self.read_buffer_size = size;
        Ok(self)
    }

    /// Lower bound for adaptive read buffer sizing.
    pub fn min_read_buffer_size(&self) -> usize {
        self.min_read_buffer_size
    }

    /// Sets the lower bound. Must be non-zero and not above the upper bound.
    pub fn set_min_read_buffer_size(&mut self, size: usize) -> Result<&mut Self> {
        if size == 0 || size > self.max_read_buffer_size {
            return Err(Error::InvalidArgument(format!(
                "min read buffer size {} must be in 1..={}",
                size, self.max_read_buffer_size
            )));
        }
        self.min_read_buffer_size = size;
        Ok(self)
    }

    /// Upper bound for adaptive read buffer sizing.
    pub fn max_read_buffer_size(&self) -> usize {
        self.max_read_buffer_size
    }

    /// Sets the upper bound. Must not be below the lower bound.
    pub fn set_max_read_buffer_size(&mut self, size: usize) -> Result<&mut Self> {
        if size < self.min_read_buffer_size {
            return Err(Error::InvalidArgument(format!(
                "max read buffer size {} is below min read buffer size {}",
                size, self.min_read_buffer_size
            )));
        }
        self.max_read_buffer_size = size;
        Ok(self)
    }

    /// Idle time of `status`, in seconds.
    pub fn idle_time(&self, status: IdleStatus) -> u32 {
        match status {
            IdleStatus::ReaderIdle => self.idle_time_for_read,
            IdleStatus::WriterIdle => self.idle_time_for_write,
            IdleStatus::BothIdle => self.idle_time_for_both,
        }
    }

    /// Idle time of `status`, in milliseconds.
    pub fn idle_time_millis(&self, status: IdleStatus) -> u64 {
        u64::from(self.idle_time(status)) * 1000
    }

    /// Sets the idle time of `status`, in seconds.
    pub fn set_idle_time(&mut self, status: IdleStatus, seconds: u32) -> &mut Self {
        match status {
            IdleStatus::ReaderIdle => self.idle_time_for_read = seconds,
            IdleStatus::WriterIdle => self.idle_time_for_write = seconds,
            IdleStatus::BothIdle => self.idle_time_for_both = seconds,
        }
        self
    }

    /// Write timeout, in seconds.
    pub fn write_timeout(&self) -> u32 {
        self.write_timeout
    }

    /// Write timeout, in milliseconds.
    pub fn write_timeout_millis(&self) -> u64 {
        u64::from(self.write_timeout) * 1000
    }

    /// Sets the write timeout, in seconds.
    pub fn set_write_timeout(&mut self, seconds: u32) -> &mut Self {
        self.write_timeout = seconds;
        self
    }

    /// Minimum time between throughput recalculations, in seconds.
    pub fn throughput_calculation_interval(&self) -> u32 {
        self.throughput_calculation_interval
    }

    /// Minimum time between throughput recalculations, in milliseconds.
    pub fn throughput_calculation_interval_millis(&self) -> u64 {
        u64::from(self.throughput_calculation_interval) * 1000
    }

    /// Sets the throughput calculation interval, in seconds.
    pub fn set_throughput_calculation_interval(&mut self, seconds: u32) -> &mut Self {
        self.throughput_calculation_interval = seconds;
        self
    }

    /// Transport-specific settings, if any.
    pub fn transport_config(&self) -> Option<&TransportConfig> {
        self.transport.as_ref()
    }

    /// Transport-specific settings downcast to their concrete type.
    pub fn transport<C: Any>(&self) -> Option<&C> {
        self.transport.as_ref().and_then(|t| t.downcast_ref::<C>())
    }

    /// Attaches transport-specific settings.
    pub fn set_transport_config(&mut self, transport: TransportConfig) -> &mut Self {
        self.transport = Some(transport);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct TcpSettings {
        no_delay: bool,
    }

    #[test]
    fn defaults() {
        let config = SessionConfig::new();
        assert_eq!(config.read_buffer_size(), DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.throughput_calculation_interval_millis(), 3_000);
        assert_eq!(config.write_timeout_millis(), 60_000);
        for status in IdleStatus::ALL {
            assert_eq!(config.idle_time(status), 0);
        }
    }

    #[test]
    fn idle_times_are_independent() {
        let mut config = SessionConfig::new();
        config
            .set_idle_time(IdleStatus::ReaderIdle, 5)
            .set_idle_time(IdleStatus::BothIdle, 10);

        assert_eq!(config.idle_time_millis(IdleStatus::ReaderIdle), 5_000);
        assert_eq!(config.idle_time(IdleStatus::WriterIdle), 0);
        assert_eq!(config.idle_time(IdleStatus::BothIdle), 10);
    }

    #[test]
    fn buffer_bounds_are_validated() {
        let mut config = SessionConfig::new();
        assert!(config.set_read_buffer_size(0).is_err());
        assert!(config.set_min_read_buffer_size(1 << 20).is_err());
        assert!(config.set_max_read_buffer_size(1).is_err());
        assert!(config.set_min_read_buffer_size(128).is_ok());
        assert_eq!(config.min_read_buffer_size(), 128);
    }

    #[test]
    fn transport_config_downcasts() {
        let mut config = SessionConfig::new();
        config.set_transport_config(TransportConfig::new(TcpSettings { no_delay: true }));

        assert_eq!(
            config.transport::<TcpSettings>(),
            Some(&TcpSettings { no_delay: true })
        );
        assert!(config.transport::<u32>().is_none());
    }
}
