//! In-process RCON server for integration tests.

#![allow(dead_code)]

use bytes::BytesMut;
use rcon_console::rcon::packet::{self, Direction, RconPacket, RconPacketType};
use rcon_console::ConnectionSettings;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const PASSWORD: &str = "secret";

/// How the server answers a non-empty command.
pub enum Reply {
    /// One RESPONSE_VALUE per entry, all tagged with the command's id.
    Fragments(Vec<String>),
    /// Answer neither the command nor the sentinel that follows it.
    Silent,
    /// Drop the socket.
    Close,
    /// Send a frame whose terminator bytes are not null.
    Malformed,
    /// Answer the command and its sentinel, then drop the socket.
    ThenClose(String),
}

/// How the server answers an AUTH packet.
#[derive(Clone, Copy)]
pub enum AuthReply {
    /// Echo the request id, or -1 for a wrong password.
    Echo,
    /// Answer with this id whatever the password.
    Id(i32),
    /// Drop the socket without answering.
    Close,
}

impl Reply {
    pub fn text(body: &str) -> Self {
        Self::Fragments(vec![body.to_string()])
    }
}

type Handler = Arc<dyn Fn(&str) -> Reply + Send + Sync>;

pub struct MockServer {
    pub addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        Self::start_with_auth(AuthReply::Echo, handler).await
    }

    pub async fn start_with_auth<F>(auth: AuthReply, handler: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler: Handler = Arc::new(handler);
        let commands = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let commands = Arc::clone(&commands);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        socket,
                        auth,
                        Arc::clone(&handler),
                        Arc::clone(&commands),
                    ));
                }
            })
        };

        Self {
            addr,
            commands,
            connections,
            task,
        }
    }

    pub fn settings(&self) -> ConnectionSettings {
        ConnectionSettings::new("127.0.0.1", self.addr.port(), PASSWORD)
    }

    /// Non-empty commands received, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    auth: AuthReply,
    handler: Handler,
    commands: Arc<Mutex<Vec<String>>>,
) {
    let mut buf = BytesMut::new();
    let mut skip_sentinel = false;
    let mut close_after_sentinel = false;

    loop {
        let packet = loop {
            match packet::decode(&mut buf, Direction::Serverbound) {
                Ok(Some(packet)) => break packet,
                Ok(None) => {}
                Err(_) => return,
            }
            match socket.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        };

        let mut out = BytesMut::new();
        match packet.packet_type {
            RconPacketType::Auth => {
                let id = match auth {
                    AuthReply::Echo if packet.body == PASSWORD => packet.id,
                    AuthReply::Echo => -1,
                    AuthReply::Id(id) => id,
                    AuthReply::Close => return,
                };
                // Source servers send an empty value ahead of the auth response
                out.extend_from_slice(&response(packet.id, String::new()));
                out.extend_from_slice(
                    &RconPacket::new(id, RconPacketType::AuthResponse, "").bytes(),
                );
            }
            RconPacketType::ExecCommand if packet.body.is_empty() => {
                if skip_sentinel {
                    skip_sentinel = false;
                } else {
                    out.extend_from_slice(&response(packet.id, String::new()));
                }
            }
            RconPacketType::ExecCommand => {
                let command = packet.body_text().into_owned();
                commands.lock().unwrap().push(command.clone());

                match handler(&command) {
                    Reply::Fragments(fragments) => {
                        for fragment in fragments {
                            out.extend_from_slice(&response(packet.id, fragment));
                        }
                    }
                    Reply::Silent => skip_sentinel = true,
                    Reply::Close => return,
                    Reply::Malformed => {
                        let mut frame = BytesMut::from(&response(packet.id, command)[..]);
                        let len = frame.len();
                        frame[len - 2..].copy_from_slice(b"!!");
                        out.extend_from_slice(&frame);
                    }
                    Reply::ThenClose(body) => {
                        out.extend_from_slice(&response(packet.id, body));
                        close_after_sentinel = true;
                    }
                }
            }
            _ => return,
        }

        if !out.is_empty() && socket.write_all(&out).await.is_err() {
            return;
        }
        if close_after_sentinel && packet.body.is_empty() {
            return;
        }
    }
}

fn response(id: i32, body: String) -> bytes::Bytes {
    RconPacket::new(id, RconPacketType::ResponseValue, body).bytes()
}
