// Wireless module - dongle settings record and fleet configurator

mod configurator;
mod settings;

pub use configurator::WirelessConfigurator;
pub use settings::{
    decode_channel, encode_channel, DongleSettings, WirelessSettings, CTRL_FLASH,
    SETTINGS_RECORD_LEN,
};
