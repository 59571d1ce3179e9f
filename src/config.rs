//! Configuration and limits for WebSocket connections and engines.

use std::time::Duration;

/// Configuration limits for WebSocket connections.
///
/// These limits prevent resource exhaustion attacks and ensure
/// bounded memory usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single frame in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a complete message in bytes.
    ///
    /// This applies to the total size after reassembling all fragments.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum number of fragments in a single message.
    ///
    /// Default: 128
    pub max_fragment_count: usize,

    /// Maximum size of handshake data in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_fragment_count: 128,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Create limits suitable for small embedded systems.
    ///
    /// - Max frame: 64 KB
    /// - Max message: 256 KB
    /// - Max fragments: 16
    /// - Max handshake: 4 KB
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
            max_fragment_count: 16,
            max_handshake_size: 4096,
        }
    }

    /// Create limits for trusted environments.
    ///
    /// On 32-bit platforms the byte limits are capped at `usize::MAX`.
    #[cfg(target_pointer_width = "64")]
    #[must_use]
    pub const fn unrestricted() -> Self {
        Self {
            max_frame_size: 1024 * 1024 * 1024,       // 1 GB
            max_message_size: 4 * 1024 * 1024 * 1024, // 4 GB
            max_fragment_count: 1024,
            max_handshake_size: 64 * 1024,
        }
    }

    /// Create limits for trusted environments (32-bit platforms).
    #[cfg(target_pointer_width = "32")]
    #[must_use]
    pub const fn unrestricted() -> Self {
        Self {
            max_frame_size: usize::MAX,
            max_message_size: usize::MAX,
            max_fragment_count: 1024,
            max_handshake_size: 64 * 1024,
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that frame size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`](crate::Error::FrameTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_frame_size {
            Err(crate::Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that fragment count is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`](crate::Error::TooManyFragments) if `count` exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<(), crate::Error> {
        if count > self.max_fragment_count {
            Err(crate::Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeout configuration for WebSocket connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to complete the opening handshake.
    ///
    /// Default: 30 seconds
    pub handshake: Duration,

    /// Interval of the lost-connection check.
    ///
    /// Every interval each open connection is pinged; a connection that has
    /// not answered with a pong for 1.5 intervals is closed abnormally.
    /// `None` disables the check.
    ///
    /// Default: 60 seconds
    pub connection_lost: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            connection_lost: Some(Duration::from_secs(60)),
        }
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(handshake: Duration, connection_lost: Option<Duration>) -> Self {
        Self {
            handshake,
            connection_lost,
        }
    }

    /// Age after which a connection without pongs counts as lost.
    #[must_use]
    pub fn pong_deadline(&self) -> Option<Duration> {
        self.connection_lost.map(|interval| interval.mul_f64(1.5))
    }
}

/// WebSocket connection and engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Fragment size for outgoing messages (in bytes).
    ///
    /// Messages larger than this will be split into multiple frames.
    ///
    /// Default: 16 KB (16 * 1024)
    pub fragment_size: usize,

    /// Accept unmasked frames from clients (server only).
    ///
    /// RFC 6455 requires clients to mask all frames. Setting this to `true`
    /// violates the RFC but may be useful for testing.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,

    /// Size of each pooled read buffer (in bytes).
    ///
    /// Default: 16 KB (16384)
    pub read_buffer_size: usize,

    /// Number of decode workers. `None` uses the available parallelism.
    pub worker_count: Option<usize>,

    /// Number of pooled read buffers. `None` uses `2 * workers + 1`.
    pub buffer_pool_size: Option<usize>,

    /// Maximum bytes written for one connection per writer pass.
    ///
    /// Default: 64 KB
    pub max_write_batch: usize,

    /// Maximum bytes queued for a peer before it is dropped as a slow consumer.
    ///
    /// Default: 16 MB
    pub max_outbound_queue: usize,

    /// Disable Nagle's algorithm on accepted and connected sockets.
    ///
    /// Default: true
    pub tcp_nodelay: bool,

    /// Copy the client's `Host` header into `Origin`.
    ///
    /// Default: false
    pub origin_from_host: bool,

    /// Timeout configuration.
    pub timeouts: Timeouts,

    /// Allowed origins for CSWSH protection.
    ///
    /// If `Some`, only connections from these origins are allowed.
    /// If `None`, origin validation is disabled.
    /// Default: None
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            accept_unmasked_frames: false,
            read_buffer_size: 16 * 1024,
            worker_count: None,
            buffer_pool_size: None,
            max_write_batch: 64 * 1024,
            max_outbound_queue: 16 * 1024 * 1024,
            tcp_nodelay: true,
            origin_from_host: false,
            timeouts: Timeouts::default(),
            allowed_origins: None,
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set fragment size for outgoing messages.
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the number of decode workers.
    #[must_use]
    pub const fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = Some(workers);
        self
    }

    /// Set the number of pooled read buffers.
    #[must_use]
    pub const fn with_buffer_pool_size(mut self, buffers: usize) -> Self {
        self.buffer_pool_size = Some(buffers);
        self
    }

    /// Set the per-pass write cap.
    #[must_use]
    pub const fn with_max_write_batch(mut self, bytes: usize) -> Self {
        self.max_write_batch = bytes;
        self
    }

    /// Set the slow-consumer queue limit.
    #[must_use]
    pub const fn with_max_outbound_queue(mut self, bytes: usize) -> Self {
        self.max_outbound_queue = bytes;
        self
    }

    /// Accept unmasked client frames.
    #[must_use]
    pub const fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Derive the client `Origin` from `Host`.
    #[must_use]
    pub const fn with_origin_from_host(mut self, enabled: bool) -> Self {
        self.origin_from_host = enabled;
        self
    }

    /// Set timeout configuration.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the lost-connection check interval. `None` disables it.
    #[must_use]
    pub fn with_connection_lost_timeout(mut self, interval: Option<Duration>) -> Self {
        self.timeouts.connection_lost = interval.filter(|d| !d.is_zero());
        self
    }

    /// Set allowed origins for CSWSH protection.
    ///
    /// Only connections with an Origin header matching one of these values
    /// will be accepted. Pass an empty vector to require an Origin header
    /// but accept any value.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = Some(origins);
        self
    }

    /// Number of decode workers after resolving the default.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(std::num::NonZeroUsize::get)
                    .unwrap_or(1)
            })
            .max(1)
    }

    /// Number of pooled read buffers after resolving the default.
    #[must_use]
    pub fn buffers(&self) -> usize {
        self.buffer_pool_size
            .unwrap_or_else(|| 2 * self.workers() + 1)
            .max(1)
    }
}
