use std::{
    io::Read,
    net::{SocketAddr, TcpListener},
    thread,
};

use tracing::{error, info, warn};

use crate::sequencer::CancelToken;

/// Listens on `address` for a `cancel` message and trips `token` when one arrives.
///
/// Lets an operator stop a long calibration between steps with e.g.
/// `printf cancel | nc 127.0.0.1 6970`.
pub fn spawn(address: SocketAddr, token: CancelToken) {
    let listener = match TcpListener::bind(address) {
        Ok(listener) => listener,
        Err(error) => {
            warn!(%address, %error, "cancel listener unavailable, run cannot be cancelled");
            return;
        }
    };

    info!(%address, "listening for cancel requests");

    thread::Builder::new()
        .name("cancel_listener".into())
        .spawn(move || listen(listener, token))
        .expect("failed to spawn cancel listener thread");
}

fn listen(listener: TcpListener, token: CancelToken) {
    let buf = &mut [0u8; 6];

    for stream in listener.incoming() {
        match stream {
            Ok(mut stream) => match stream.read_exact(buf) {
                Ok(()) if &buf[..] == b"cancel" => {
                    warn!("cancel requested, stopping after the current step");
                    token.cancel();
                }
                Ok(()) => warn!("received non-recognized data over tcp connection"),
                Err(err) => error!(?err, "encountered an error reading from tcp connection"),
            },
            Err(err) => error!(?err, "failed to accept incoming tcp connection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        net::TcpStream,
        time::{Duration, Instant},
    };

    use super::*;

    fn free_address() -> SocketAddr {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
    }

    fn wait_for(token: &CancelToken) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);

        while Instant::now() < deadline {
            if token.is_cancelled() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }

        false
    }

    #[test]
    fn cancel_message_trips_token() {
        let address = free_address();
        let token = CancelToken::default();

        spawn(address, token.clone());

        TcpStream::connect(address)
            .unwrap()
            .write_all(b"detach")
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(!token.is_cancelled());

        TcpStream::connect(address)
            .unwrap()
            .write_all(b"cancel")
            .unwrap();
        assert!(wait_for(&token));
    }
}
