//! Shared helpers for integration tests.
//!
//! [`FakeServer`] is a tiny in-memory server speaking the wire protocol on a
//! loopback port. It implements just enough commands for the client paths
//! under test: strings, lists, MULTI/EXEC with WATCH, pub/sub, AUTH/SELECT,
//! plus `HANG` (never answers) and `KILL` (drops the socket).

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use redlink::EndpointParameters;

#[derive(Default)]
struct Store {
    values: HashMap<Vec<u8>, Vec<u8>>,
    lists: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    versions: HashMap<Vec<u8>, u64>,
    subscribers: HashMap<Vec<u8>, Vec<(usize, TcpStream)>>,
    log: Vec<Vec<String>>,
    connections: usize,
}

impl Store {
    fn touch(&mut self, key: &[u8]) {
        *self.versions.entry(key.to_vec()).or_insert(0) += 1;
    }

    fn version(&self, key: &[u8]) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }
}

/// Per-connection state.
#[derive(Default)]
struct Session {
    id: usize,
    authenticated: bool,
    queued: Option<Vec<Vec<Vec<u8>>>>,
    dirty: bool,
    watched: HashMap<Vec<u8>, u64>,
    channels: HashSet<Vec<u8>>,
    patterns: HashSet<Vec<u8>>,
}

impl Session {
    fn subscriptions(&self) -> i64 {
        (self.channels.len() + self.patterns.len()) as i64
    }
}

enum Action {
    Reply(Vec<u8>),
    Silent,
    Close(Vec<u8>),
}

#[derive(Clone)]
pub struct FakeServer {
    addr: SocketAddr,
    store: Arc<Mutex<Store>>,
    password: Option<String>,
}

static SESSION_ID: AtomicUsize = AtomicUsize::new(0);

impl FakeServer {
    pub fn start() -> Self {
        Self::spawn(None)
    }

    /// A server that rejects every command until `AUTH password`.
    pub fn with_password(password: &str) -> Self {
        Self::spawn(Some(password.to_string()))
    }

    fn spawn(password: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake server");
        let addr = listener.local_addr().expect("local addr");
        let server = Self {
            addr,
            store: Arc::new(Mutex::new(Store::default())),
            password,
        };

        let accept = server.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let session = accept.clone();
                thread::spawn(move || session.serve(stream));
            }
        });
        server
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn params(&self) -> EndpointParameters {
        EndpointParameters::tcp("127.0.0.1", self.port())
    }

    pub fn uri(&self) -> String {
        format!("tcp://127.0.0.1:{}", self.port())
    }

    /// Every command received so far, upper-cased identifier first.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.store.lock().log.clone()
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands().into_iter().map(|c| c[0].clone()).collect()
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().values.get(key.as_bytes()).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let store = self.store.lock();
        let mut keys: Vec<String> = store
            .values
            .keys()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect();
        keys.sort();
        keys
    }

    /// Number of accepted connections.
    pub fn connections(&self) -> usize {
        self.store.lock().connections
    }

    /// Set a key from outside any client connection.
    pub fn set(&self, key: &str, value: &str) {
        let mut store = self.store.lock();
        store.values.insert(key.as_bytes().to_vec(), value.as_bytes().to_vec());
        store.touch(key.as_bytes());
    }

    /// Wait until `n` subscriptions are registered for `channel`.
    pub fn wait_for_subscribers(&self, channel: &str, n: usize) {
        for _ in 0..200 {
            let count = self
                .store
                .lock()
                .subscribers
                .get(channel.as_bytes())
                .map_or(0, Vec::len);
            if count >= n {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("no subscriber showed up on {channel}");
    }

    fn serve(self, stream: TcpStream) {
        let id = SESSION_ID.fetch_add(1, Ordering::Relaxed);
        self.store.lock().connections += 1;
        let mut session = Session {
            id,
            authenticated: self.password.is_none(),
            ..Session::default()
        };

        let Ok(mut writer) = stream.try_clone() else { return };
        let mut reader = BufReader::new(stream);
        loop {
            let args = match read_request(&mut reader) {
                Ok(Some(args)) => args,
                _ => break,
            };
            match self.dispatch(&mut session, &writer, &args) {
                Action::Reply(out) => {
                    if writer.write_all(&out).is_err() {
                        break;
                    }
                }
                Action::Silent => {}
                Action::Close(out) => {
                    // Half-close and swallow whatever the client already
                    // sent so it sees a clean EOF instead of a reset.
                    let _ = writer.write_all(&out);
                    let _ = writer.shutdown(Shutdown::Write);
                    let _ = io::copy(&mut reader, &mut io::sink());
                    break;
                }
            }
        }

        let mut store = self.store.lock();
        for subscribers in store.subscribers.values_mut() {
            subscribers.retain(|(sid, _)| *sid != session.id);
        }
    }

    fn dispatch(&self, session: &mut Session, socket: &TcpStream, args: &[Vec<u8>]) -> Action {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        self.store.lock().log.push(
            std::iter::once(name.clone())
                .chain(args[1..].iter().map(|a| String::from_utf8_lossy(a).into_owned()))
                .collect(),
        );

        match name.as_str() {
            "HANG" => return Action::Silent,
            "KILL" => return Action::Close(Vec::new()),
            "QUIT" => return Action::Close(status("OK")),
            "AUTH" => return Action::Reply(self.auth(session, &args[1..])),
            _ => {}
        }

        if !session.authenticated {
            return Action::Reply(error("NOAUTH Authentication required."));
        }

        if session.subscriptions() > 0 {
            let allowed = [
                "SUBSCRIBE",
                "UNSUBSCRIBE",
                "PSUBSCRIBE",
                "PUNSUBSCRIBE",
                "PING",
            ];
            if !allowed.contains(&name.as_str()) {
                return Action::Reply(error(&format!(
                    "ERR Can't execute '{}': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT are allowed in this context",
                    name.to_ascii_lowercase()
                )));
            }
        }

        Action::Reply(match name.as_str() {
            "MULTI" => match session.queued {
                Some(_) => error("ERR MULTI calls can not be nested"),
                None => {
                    session.queued = Some(Vec::new());
                    session.dirty = false;
                    status("OK")
                }
            },
            "EXEC" => self.exec(session),
            "DISCARD" => match session.queued.take() {
                Some(_) => {
                    session.watched.clear();
                    status("OK")
                }
                None => error("ERR DISCARD without MULTI"),
            },
            "WATCH" if session.queued.is_some() => error("ERR WATCH inside MULTI is not allowed"),
            "WATCH" => {
                let store = self.store.lock();
                for key in &args[1..] {
                    session.watched.insert(key.clone(), store.version(key));
                }
                status("OK")
            }
            "UNWATCH" if session.queued.is_none() => {
                session.watched.clear();
                status("OK")
            }
            "SUBSCRIBE" => self.subscribe(session, socket, &args[1..]),
            "UNSUBSCRIBE" => self.unsubscribe(session, &args[1..]),
            "PSUBSCRIBE" => {
                let mut out = Vec::new();
                for pattern in &args[1..] {
                    session.patterns.insert(pattern.clone());
                    out.extend(ack("psubscribe", Some(pattern.as_slice()), session.subscriptions()));
                }
                out
            }
            "PUNSUBSCRIBE" => {
                let patterns: Vec<Vec<u8>> = if args.len() > 1 {
                    args[1..].to_vec()
                } else {
                    session.patterns.iter().cloned().collect()
                };
                let mut out = Vec::new();
                for pattern in &patterns {
                    session.patterns.remove(pattern);
                    out.extend(ack("punsubscribe", Some(pattern.as_slice()), session.subscriptions()));
                }
                if patterns.is_empty() {
                    out.extend(ack("punsubscribe", None, session.subscriptions()));
                }
                out
            }
            "PING" if session.subscriptions() > 0 => {
                let payload = args.get(1).cloned().unwrap_or_default();
                array(vec![bulk(b"pong"), bulk(&payload)])
            }
            _ => match session.queued.as_mut() {
                Some(queue) => {
                    if is_known(&name) {
                        queue.push(args.to_vec());
                        status("QUEUED")
                    } else {
                        session.dirty = true;
                        error(&format!("ERR unknown command '{}'", name.to_ascii_lowercase()))
                    }
                }
                None => self.run(&name, &args[1..]),
            },
        })
    }

    fn auth(&self, session: &mut Session, args: &[Vec<u8>]) -> Vec<u8> {
        let Some(expected) = self.password.as_deref() else {
            return error("ERR AUTH <password> called without any password configured for the default user.");
        };
        let given = args.last().map(|p| String::from_utf8_lossy(p).into_owned());
        if given.as_deref() == Some(expected) {
            session.authenticated = true;
            status("OK")
        } else {
            error("WRONGPASS invalid username-password pair or user is disabled.")
        }
    }

    fn exec(&self, session: &mut Session) -> Vec<u8> {
        let Some(queued) = session.queued.take() else {
            return error("ERR EXEC without MULTI");
        };
        let watched = std::mem::take(&mut session.watched);
        if session.dirty {
            return error("EXECABORT Transaction discarded because of previous errors.");
        }

        let conflict = {
            let store = self.store.lock();
            watched.iter().any(|(key, version)| store.version(key) != *version)
        };
        if conflict {
            return b"*-1\r\n".to_vec();
        }

        let replies = queued
            .iter()
            .map(|cmd| {
                let name = String::from_utf8_lossy(&cmd[0]).to_ascii_uppercase();
                self.run(&name, &cmd[1..])
            })
            .collect();
        array(replies)
    }

    fn subscribe(&self, session: &mut Session, socket: &TcpStream, channels: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for channel in channels {
            if session.channels.insert(channel.clone()) {
                if let Ok(clone) = socket.try_clone() {
                    self.store
                        .lock()
                        .subscribers
                        .entry(channel.clone())
                        .or_default()
                        .push((session.id, clone));
                }
            }
            out.extend(ack("subscribe", Some(channel.as_slice()), session.subscriptions()));
        }
        out
    }

    fn unsubscribe(&self, session: &mut Session, channels: &[Vec<u8>]) -> Vec<u8> {
        let channels: Vec<Vec<u8>> = if channels.is_empty() {
            session.channels.iter().cloned().collect()
        } else {
            channels.to_vec()
        };

        let mut out = Vec::new();
        for channel in &channels {
            session.channels.remove(channel);
            if let Some(subscribers) = self.store.lock().subscribers.get_mut(channel) {
                subscribers.retain(|(sid, _)| *sid != session.id);
            }
            out.extend(ack("unsubscribe", Some(channel.as_slice()), session.subscriptions()));
        }
        if channels.is_empty() {
            out.extend(ack("unsubscribe", None, session.subscriptions()));
        }
        out
    }

    /// Plain data commands, also used to run EXEC batches.
    fn run(&self, name: &str, args: &[Vec<u8>]) -> Vec<u8> {
        let mut store = self.store.lock();
        match (name, args) {
            ("PING", []) => status("PONG"),
            ("PING", [message]) | ("ECHO", [message]) => bulk(message),
            ("SELECT", [_]) | ("UNWATCH", []) => status("OK"),
            ("SET", [key, value]) => {
                store.values.insert(key.clone(), value.clone());
                store.touch(key);
                status("OK")
            }
            ("GET", [key]) => match store.values.get(key) {
                Some(value) => bulk(value),
                None => b"$-1\r\n".to_vec(),
            },
            ("DEL", keys) if !keys.is_empty() => {
                let mut removed = 0;
                for key in keys {
                    if store.values.remove(key).is_some() | store.lists.remove(key).is_some() {
                        removed += 1;
                        store.touch(key);
                    }
                }
                integer(removed)
            }
            ("INCR", [key]) => {
                let current = store.values.get(key).cloned().unwrap_or_else(|| b"0".to_vec());
                let Some(n) = std::str::from_utf8(&current)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                else {
                    return error("ERR value is not an integer or out of range");
                };
                store.values.insert(key.clone(), (n + 1).to_string().into_bytes());
                store.touch(key);
                integer(n + 1)
            }
            ("RPUSH", [key, values @ ..]) if !values.is_empty() => {
                let list = store.lists.entry(key.clone()).or_default();
                list.extend(values.iter().cloned());
                let len = list.len() as i64;
                store.touch(key);
                integer(len)
            }
            ("LRANGE", [key, _, _]) => {
                let items = store.lists.get(key).cloned().unwrap_or_default();
                array(items.iter().map(|v| bulk(v)).collect())
            }
            ("PUBLISH", [channel, message]) => {
                let frame = array(vec![bulk(b"message"), bulk(channel), bulk(message)]);
                let mut delivered = 0;
                if let Some(subscribers) = store.subscribers.get_mut(channel) {
                    for (_, socket) in subscribers.iter_mut() {
                        if socket.write_all(&frame).is_ok() {
                            delivered += 1;
                        }
                    }
                }
                integer(delivered)
            }
            (name, _) if is_known(name) => error(&format!(
                "ERR wrong number of arguments for '{}' command",
                name.to_ascii_lowercase()
            )),
            (name, _) => error(&format!("ERR unknown command '{}'", name.to_ascii_lowercase())),
        }
    }
}

fn is_known(name: &str) -> bool {
    matches!(
        name,
        "PING" | "ECHO" | "SELECT" | "SET" | "GET" | "DEL" | "INCR" | "RPUSH" | "LRANGE"
            | "PUBLISH" | "UNWATCH"
    )
}

/// Read one request (an array of bulk strings). `None` on clean EOF.
fn read_request(reader: &mut BufReader<TcpStream>) -> io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let count: usize = line
        .trim_end()
        .strip_prefix('*')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "expected array header"))?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line)?;
        let len: usize = line
            .trim_end()
            .strip_prefix('$')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "expected bulk header"))?;
        let mut data = vec![0; len + 2];
        reader.read_exact(&mut data)?;
        data.truncate(len);
        args.push(data);
    }
    Ok(Some(args))
}

fn status(text: &str) -> Vec<u8> {
    format!("+{text}\r\n").into_bytes()
}

fn error(text: &str) -> Vec<u8> {
    format!("-{text}\r\n").into_bytes()
}

fn integer(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend(item);
    }
    out
}

fn ack(kind: &str, channel: Option<&[u8]>, count: i64) -> Vec<u8> {
    let channel = match channel {
        Some(channel) => bulk(channel),
        None => b"$-1\r\n".to_vec(),
    };
    array(vec![bulk(kind.as_bytes()), channel, integer(count)])
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}
