// Chat relay: accepts clients on CHAT_PORT and forwards every line a client sends to all others.
//
// usage: server <udp bind addr> <link addr>

use std::sync::Arc;
use std::time;

const CHAT_PORT: seqlink::packet::Port = 15;
const CLIENT_COUNT_MAX: usize = 16;
const LINE_SIZE_MAX: usize = 1000;

static POLL_INTERVAL: time::Duration = time::Duration::from_millis(10);

struct Client {
    socket: seqlink::Socket,
    line: Vec<u8>,
}

fn parse_args() -> Option<(String, seqlink::packet::LinkAddress)> {
    let mut args = std::env::args().skip(1);

    let bind_addr = args.next()?;
    let link_addr = args.next()?.parse().ok()?;

    Some((bind_addr, link_addr))
}

fn main() {
    env_logger::init();

    let (bind_addr, link_addr) = match parse_args() {
        Some(args) => args,
        None => {
            eprintln!("usage: server <udp bind addr> <link addr>");
            std::process::exit(2);
        }
    };

    let link = seqlink::link::udp::UdpLink::bind(bind_addr.as_str(), link_addr)
        .expect("failed to bind UDP link");

    println!("listening at {} as link address {}", link.local_addr(), link_addr);

    let post_office =
        seqlink::PostOffice::new(Arc::new(link)).expect("failed to start post office");

    let mut clients: Vec<Option<Client>> = (0..CLIENT_COUNT_MAX).map(|_| None).collect();

    loop {
        if let Some(socket) = post_office.accept(CHAT_PORT) {
            match clients.iter().position(|c| c.is_none()) {
                Some(slot) => {
                    println!("client {} arrived ({})", slot, socket.identity());
                    clients[slot] = Some(Client {
                        socket,
                        line: Vec::new(),
                    });
                }
                None => {
                    println!("room full, turning away {}", socket.identity());
                    socket.close();
                }
            }
        }

        for sender in 0..CLIENT_COUNT_MAX {
            let lines = match &mut clients[sender] {
                Some(client) => read_lines(client),
                None => continue,
            };

            let lines = match lines {
                Some(lines) => lines,
                None => {
                    println!("client {} left", sender);
                    clients[sender] = None;
                    continue;
                }
            };

            for line in lines {
                print!("client {} says: {}", sender, String::from_utf8_lossy(&line));

                for receiver in 0..CLIENT_COUNT_MAX {
                    if receiver == sender {
                        continue;
                    }

                    if let Some(client) = &mut clients[receiver] {
                        if client.socket.send(&line).is_err() {
                            println!("unable to write to client {}, disconnecting", receiver);
                            clients[receiver] = None;
                        }
                    }
                }
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

// Returns the complete lines received from `client`, or None if it has gone away
fn read_lines(client: &mut Client) -> Option<Vec<Vec<u8>>> {
    let mut lines = Vec::new();

    loop {
        let bytes = client.socket.receive(LINE_SIZE_MAX)?;

        if bytes.is_empty() {
            break;
        }

        for byte in bytes {
            client.line.push(byte);

            if byte == b'\n' || client.line.len() == LINE_SIZE_MAX {
                lines.push(std::mem::take(&mut client.line));
            }
        }
    }

    Some(lines)
}
