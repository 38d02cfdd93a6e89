use typed_builder::TypedBuilder;

/// Serial port options consumed by the engine.
///
/// Loading these from a configuration file is the host's job; the frontend
/// builds one from command line flags.
#[derive(TypedBuilder, Clone, Debug, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device identifier used to select the transport.
    ///
    /// `INTERNAL_SERIAL`, `LOOPBACK_SERIAL`, `tcp:...` and `ENET:...` are
    /// reserved; an empty name means "no device", anything else names a
    /// physical port.
    #[builder(default, setter(into))]
    pub device_name: String,
    #[builder(default, setter(into))]
    pub midi_out_device: String,
    #[builder(default, setter(into))]
    pub midi_in_device: String,
    #[builder(default = 1)]
    pub stop_bits: u8,
    /// Delegate RTS/CTS handshaking to the host device.
    #[builder(default = false)]
    pub hw_flow_control: bool,
    /// Translate LF to CR+LF on transmit and collapse CR+LF on receive.
    #[builder(default = false)]
    pub crlf: bool,
    #[builder(default = false)]
    pub cycle_exact: bool,
    /// Low latency mode: one transfer per scan line, never replace unread
    /// data.
    #[builder(default = false)]
    pub direct: bool,
    /// Emulate DTR/RTS/CD/CTS/DSR through the CIA port bits.
    #[builder(default = false)]
    pub modem_lines: bool,
    /// Map the device's ring indicator onto the SEL bit.
    #[builder(default = false)]
    pub ring_indicator: bool,
    /// SEL is shared with an attached parallel printer.
    #[builder(default = false)]
    pub printer_shares_sel: bool,
    /// Open the port when DTR is raised and close it when DTR drops.
    #[builder(default = false)]
    pub open_on_demand: bool,
    #[builder(default = 200)]
    pub receive_queue_capacity: usize,
    /// Upper bound for a blocking read from a physical device.
    #[builder(default = 1000)]
    pub read_timeout_ms: u32,
    /// Echo transmitted characters to the log, one line per entry.
    #[builder(default = false)]
    pub log_output: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SerialConfig {
    pub fn has_midi(&self) -> bool {
        !self.midi_out_device.is_empty() || !self.midi_in_device.is_empty()
    }
}
