/**
 * How often (milliseconds) to poll the adapter while waiting for a peripheral to show up.
 */
pub const POLL_DELAY: u64 = 100;

/**
 * How long (milliseconds) locating and connecting to a peripheral may take.
 */
pub const CONNECT_DEADLINE: u64 = 10000;

/**
 * How long (milliseconds) a read or write of a characteristic may take.
 */
pub const IO_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) to wait for the DISCONNECTED notification when shutting down.
 */
pub const SHUTDOWN_DEADLINE: u64 = 3000;

/**
 * Default duration (milliseconds) of a scan.
 */
pub const SCAN_MILLIS: u64 = 5000;

/**
 * A scan never stops earlier than this (milliseconds), even if enough devices have been found.
 */
pub const SCAN_MIN_MILLIS: u64 = 2000;

/**
 * Capacity of the channels feeding the driver (commands, transport events) and the event sink.
 */
pub const CHANNEL_CAPACITY: usize = 64;
