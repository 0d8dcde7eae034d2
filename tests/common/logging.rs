use std::{io, sync::Once, thread};

use log::LevelFilter;
use roundbft::types::basic::Address;

static LOGGER_INIT: Once = Once::new();

// Set up a logger that logs all log messages with level Trace and above.
pub(crate) fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .unwrap();
    })
}

pub(crate) fn log_with_context(node: Option<&Address>, message: &str) {
    match node {
        Some(address) => log::info!("{}, {}", first_seven_chars(address.as_str()), message),
        None => log::info!("test, {}", message),
    }
}

// Get a more readable representation of an address or hash by taking its first 7 characters.
pub(crate) fn first_seven_chars(string: &str) -> &str {
    match string.char_indices().nth(7) {
        Some((end, _)) => &string[..end],
        None => string,
    }
}
