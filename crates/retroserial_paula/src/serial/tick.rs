use super::receive::BREAK_TRANSMIT_DELAY;
use super::status::Serdatr;
use super::{SerialHost, SerialPort};
use crate::transport::{TransportSession, CONTROL_BREAK, CONTROL_LINES};

impl SerialPort {
    /// Advance the port by one scanline. Called by the host at every
    /// horizontal sync.
    pub fn tick_line(&mut self, host: &mut dyn SerialHost) {
        let can = self.can_receive(host);
        if can {
            if let Some(byte) = self.peripheral.as_mut().and_then(|p| p.poll_receive()) {
                self.rx.word = u16::from(byte) | Serdatr::STOP8.bits();
                self.raise_receive(host);
            }
        }
        self.tx.last_bit_lines = self.tx.last_bit_lines.saturating_sub(1);
        self.service_remote_line(host, can);
        if self.rx.full {
            self.rx.lines_unread = self.rx.lines_unread.saturating_add(1);
        }

        // At most one step per accumulator per line; the excess carries over.
        let line = host.line_cycles();
        self.clock.tx_counter = self.clock.tx_counter.saturating_add(line);
        if self.clock.tx_counter >= self.clock.tx_period {
            self.clock.tx_counter -= self.clock.tx_period;
            self.check_shift_empty(host);
        }
        self.clock.rx_counter = self.clock.rx_counter.saturating_add(line);
        if self.clock.rx_counter >= self.clock.rx_period {
            self.clock.rx_counter -= self.clock.rx_period;
            self.receive_next_buffered(host);
            self.check_receive_bytes(host);
            self.check_receive_relay(host);
        }

        if self.rx.break_counter > 1 {
            self.rx.break_counter -= 1;
            if self.rx.break_counter == 1 {
                self.transport.flush();
            }
        }
    }

    /// Words and line state arriving from a shared memory peer, and breaks
    /// on a looped back line.
    fn service_remote_line(&mut self, host: &mut dyn SerialHost, can: bool) {
        let (received, break_on) = match &mut self.transport {
            TransportSession::SharedMemoryIpc(t) => {
                let mut received = None;
                if can {
                    while let Some(v) = t.receive() {
                        if v & 0xffff_0000 == 0 {
                            received = Some(v as u16);
                            break;
                        } else if v & CONTROL_LINES != 0 {
                            t.set_remote_lines(v);
                        } else if v & CONTROL_BREAK != 0 && t.apply_break_word(v) {
                            break;
                        }
                    }
                }
                (received, t.remote_break())
            }
            TransportSession::Loopback => (None, self.tx.break_active),
            _ => return,
        };

        if let Some(word) = received {
            self.rx.word = word;
            self.raise_receive(host);
        }
        if break_on {
            self.rx.break_counter = host.frame_lines() as i32;
        }
        if self.rx.break_counter > 0 {
            self.rx.word = 0;
            if self.rx.break_delay == 0 {
                self.raise_receive(host);
                self.rx.break_delay = BREAK_TRANSMIT_DELAY;
            }
            if self.rx.break_delay > 0 {
                self.rx.break_delay -= 1;
            }
        }
        if self.rx.break_counter == 1 {
            self.rx.break_counter = 0;
            self.rx.break_delay = 0;
            self.rx.word |= Serdatr::STOP8.bits();
            self.raise_receive(host);
        }
    }
}
