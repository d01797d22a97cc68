// Chat client: sends each line typed on stdin to the relay and prints every line received. A
// line containing a single '.' leaves the room.
//
// usage: client <udp bind addr> <link addr> <server udp addr> <server link addr>

use std::io::BufRead;
use std::net;
use std::sync::mpsc;
use std::sync::Arc;
use std::time;

const CHAT_PORT: seqlink::packet::Port = 15;
const RECEIVE_SIZE_MAX: usize = 1000;

static POLL_INTERVAL: time::Duration = time::Duration::from_millis(10);
static SHUTDOWN_TIMEOUT: time::Duration = time::Duration::from_secs(5);

struct Args {
    bind_addr: String,
    link_addr: seqlink::packet::LinkAddress,
    server_addr: net::SocketAddr,
    server_link_addr: seqlink::packet::LinkAddress,
}

fn parse_args() -> Option<Args> {
    let mut args = std::env::args().skip(1);

    Some(Args {
        bind_addr: args.next()?,
        link_addr: args.next()?.parse().ok()?,
        server_addr: args.next()?.parse().ok()?,
        server_link_addr: args.next()?.parse().ok()?,
    })
}

fn main() {
    env_logger::init();

    let args = match parse_args() {
        Some(args) => args,
        None => {
            eprintln!("usage: client <udp bind addr> <link addr> <server udp addr> <server link addr>");
            std::process::exit(2);
        }
    };

    let mut link_config = seqlink::link::udp::Config::default();
    link_config
        .address_book
        .insert(args.server_link_addr, args.server_addr);

    let link = seqlink::link::udp::UdpLink::bind_with_config(
        args.bind_addr.as_str(),
        args.link_addr,
        link_config,
    )
    .expect("failed to bind UDP link");

    let post_office =
        seqlink::PostOffice::new(Arc::new(link)).expect("failed to start post office");

    let mut socket = match post_office.connect(args.server_link_addr, CHAT_PORT) {
        Ok(socket) => socket,
        Err(err) => {
            eprintln!("failed to connect: {}", err);
            std::process::exit(1);
        }
    };

    println!("connected to {}", args.server_link_addr);

    // stdin blocks, so it gets its own thread
    let (line_tx, line_rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut received = Vec::new();

    'chat: loop {
        match socket.receive(RECEIVE_SIZE_MAX) {
            Some(bytes) => {
                for byte in bytes {
                    received.push(byte);

                    if byte == b'\n' {
                        print!("{}", String::from_utf8_lossy(&received));
                        received.clear();
                    }
                }
            }
            None => {
                println!("server shut down");
                break 'chat;
            }
        }

        loop {
            match line_rx.try_recv() {
                Ok(line) => {
                    if line == "." {
                        println!("leaving chat room");
                        break 'chat;
                    }

                    if line.is_empty() {
                        continue;
                    }

                    if socket.send(format!("{}\n", line).as_bytes()).is_err() {
                        println!("connection to server lost");
                        break 'chat;
                    }
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => break 'chat,
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }

    socket.close();

    if !post_office.shutdown_timeout(SHUTDOWN_TIMEOUT) {
        eprintln!("server did not acknowledge close");
    }
}
