const USAGE: &str = "\
Usage: retroserial [DEVICE] [OPTIONS]

DEVICE is a host serial port, tcp:HOST:PORT[/wait], ENET:[H], LOOPBACK_SERIAL
or INTERNAL_SERIAL. Without one the port is left unconnected.

Options:
  --baud N         line speed (default 9600)
  --ninebit        9-bit frames
  --crlf           translate LF to CR LF and back
  --cycle-exact    cycle exact shift timing
  --direct         one transfer per scan line
  --modem-lines    emulate DTR/RTS/CD/CTS/DSR
  --rtscts         hardware flow control on the host device
  --midi-out DEV   MIDI output device
  --midi-in DEV    MIDI input device
  --log-output     log transmitted characters
  --frames N       stop after N frames
  --listen         keep running after stdin ends
  --no-throttle    do not pace to PAL frame time";

fn main() {
    env_logger::init();

    let options = match retroserial::parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(1);
        }
    };

    if options.config.device_name.is_empty() && !options.config.has_midi() {
        log::info!("No device given, running with the port unconnected");
    }

    if let Err(e) = retroserial::run(options) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
