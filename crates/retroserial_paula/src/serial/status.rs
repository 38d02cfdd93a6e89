use bitflags::bitflags;

bitflags! {
    /// SERDATR status bits above the received data.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct Serdatr: u16 {
        /// Receiver overrun.
        const OVRUN = 0x8000;
        /// Receive buffer full.
        const RBF = 0x4000;
        /// Transmit buffer empty.
        const TBE = 0x2000;
        /// Transmit shift register empty.
        const TSRE = 0x1000;
        /// Level of the RXD pin.
        const RXD = 0x0800;
        /// Stop bit in 9-bit mode.
        const STOP9 = 0x0200;
        /// Stop bit in 8-bit mode.
        const STOP8 = 0x0100;
    }
}

impl Serdatr {
    /// Data and stop bits of a received word.
    pub const WORD_MASK: u16 = 0x03ff;
}

bitflags! {
    /// Modem control bits on CIA-B port A. Every line is active low: a set
    /// bit means the signal is off.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct CiaSerialBits: u8 {
        const DTR = 0x80;
        const RTS = 0x40;
        const CD = 0x20;
        const CTS = 0x10;
        const DSR = 0x08;
        /// Shared with the parallel port; doubles as ring indicator.
        const SEL = 0x04;
    }
}

impl CiaSerialBits {
    /// Bits driven by the port, as opposed to by the CPU.
    pub const INPUTS: CiaSerialBits = CiaSerialBits::CD
        .union(CiaSerialBits::CTS)
        .union(CiaSerialBits::DSR)
        .union(CiaSerialBits::SEL);
    pub const OUTPUTS: CiaSerialBits = CiaSerialBits::DTR.union(CiaSerialBits::RTS);
}
