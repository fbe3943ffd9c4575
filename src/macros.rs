macro_rules! log_bitrate_estimate {
    ($($arg:expr),+) => {
        crate::log_stat!("BITRATE_ESTIMATE", $($arg),+);
    }
}

macro_rules! log_available_bitrate {
    ($($arg:expr),+) => {
        crate::log_stat!("AVAILABLE_BITRATE", $($arg),+);
    }
}

macro_rules! log_vivace_utility {
    ($($arg:expr),+) => {
        crate::log_stat!("VIVACE_UTILITY", $($arg),+);
    }
}

macro_rules! log_delay_gradient {
    ($($arg:expr),+) => {
        crate::log_stat!("DELAY_GRADIENT", $($arg),+);
    }
}

macro_rules! log_loss {
    ($($arg:expr),+) => {
        crate::log_stat!("LOSS", $($arg),+);
    }
}

macro_rules! log_rtt {
    ($($arg:expr),+) => {
        crate::log_stat!("RTT", $($arg),+);
    }
}

macro_rules! log_accumulated_delay {
    ($($arg:expr),+) => {
        crate::log_stat!("ACCUMULATED_DELAY", $($arg),+);
    }
}

pub(crate) use log_accumulated_delay;
pub(crate) use log_available_bitrate;
pub(crate) use log_bitrate_estimate;
pub(crate) use log_delay_gradient;
pub(crate) use log_loss;
pub(crate) use log_rtt;
pub(crate) use log_vivace_utility;
