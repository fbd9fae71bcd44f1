//! In-memory SSH peer for integration tests.
//!
//! [`Peer`] plays the server side of the connection protocol behind a
//! loopback [`SecureStream`]: every frame the session writes is processed
//! synchronously and the replies wait for the session's next read. It
//! serves a small in-memory filesystem over SFTP and SCP, runs a handful of
//! canned commands and opens X11 or forwarded-tcpip channels on demand.

#![allow(dead_code)]

use bytes::BytesMut;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tether_platform::{
    Direction, Established, NegotiatedMethods, SecureStream, SecurityProvider, TetherError,
    TetherResult,
};
use tether_proto::ssh::auth::{
    construct_signature_data, parse_info_response, AuthFailure, AuthMethod, AuthRequest,
    InfoRequest, Prompt,
};
use tether_proto::ssh::sftp::{
    DirEntry, FileAttributes, SftpErrorCode, SftpMessage, SftpRequest, SftpResponse, POSIX_RENAME,
    SFTP_VERSION,
};
use tether_proto::ssh::{
    ChannelOpenFailureReason, ChannelRequestType, ChannelType, ConnectionMessage, Credentials,
    Disconnect, DisconnectReason, FrameCodec, GlobalRequestType, MessageType, Session,
    SessionConfig,
};

pub const PEER_BANNER: &str = "SSH-2.0-TestPeer_1.0";
pub const USER: &str = "alice";
pub const PASSWORD: &str = "wonderland";
pub const OTP: &str = "424242";
pub const SESSION_ID: [u8; 32] = [0x5a; 32];
pub const HOST_KEY: &[u8] = b"test host key blob";

/// Port handed out for `tcpip-forward` requests on port 0.
pub const BOUND_PORT: u32 = 40000;

const SSH_FXF_WRITE: u32 = 0x02;
const SSH_FXF_CREAT: u32 = 0x08;
const SSH_FXF_TRUNC: u32 = 0x10;
const SSH_FXF_EXCL: u32 = 0x20;

/// Something queued for the client on one channel, sent in order.
#[derive(Debug)]
enum Out {
    Data(u32, Vec<u8>),
    Message(ConnectionMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkStage {
    Header,
    Data { name: String, remaining: u64 },
    Trailer { name: String },
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStage {
    Start,
    HeaderSent,
    DataSent,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Echo,
    Silent,
    Sftp,
    ScpSink { path: String, stage: SinkStage },
    ScpSource { path: String, stage: SourceStage },
}

/// Server side view of one channel.
#[derive(Debug)]
pub struct PeerChannel {
    /// The session's channel number; `None` until it confirms our open.
    pub client_id: Option<u32>,
    pub mode: Mode,
    /// Credit the session granted us.
    pub window: u32,
    pub max_packet: u32,
    /// Every request name received, in order.
    pub requests: Vec<String>,
    pub received: Vec<u8>,
    pub stderr_received: Vec<u8>,
    pub eof_received: bool,
    pub close_sent: bool,
    rx: BytesMut,
    backlog: VecDeque<Out>,
    scp_file: Vec<u8>,
}

impl PeerChannel {
    fn new(client_id: Option<u32>, window: u32, max_packet: u32, mode: Mode) -> Self {
        Self {
            client_id,
            mode,
            window,
            max_packet,
            requests: Vec::new(),
            received: Vec::new(),
            stderr_received: Vec::new(),
            eof_received: false,
            close_sent: false,
            rx: BytesMut::new(),
            backlog: VecDeque::new(),
            scp_file: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum SftpTarget {
    File(String),
    /// `served` counts the entries already returned by READDIR.
    Dir { path: String, served: usize },
}

/// Everything the peer knows. Fields are public so tests can arrange and
/// inspect the server side directly.
pub struct PeerState {
    codec: FrameCodec,
    inbound: BytesMut,
    outbound: BytesMut,
    pub banner: String,
    pub client_banner: Option<String>,
    pub password: String,
    pub otp: String,
    pub allow_none: bool,
    pub authorized_keys: Vec<Vec<u8>>,
    pub auth_log: Vec<String>,
    /// Receive window announced for channels the peer confirms or opens.
    pub window: u32,
    pub posix_rename: bool,
    /// Entries per READDIR reply.
    pub readdir_batch: usize,
    pub fail_handshake: bool,
    pub connect_delays: usize,
    pub block_sends: usize,
    pub block_recvs: usize,
    pub hung_up: bool,
    pub client_disconnect: Option<String>,
    pub ignores: usize,
    pub forwards: Vec<(String, u32)>,
    pub channels: HashMap<u32, PeerChannel>,
    /// Server channel numbers whose open the session rejected, with the reason.
    pub rejected: Vec<(u32, u32)>,
    next_channel: u32,
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub links: BTreeMap<String, String>,
    pub setstat_log: Vec<(String, FileAttributes)>,
    handles: HashMap<Vec<u8>, SftpTarget>,
    next_handle: u32,
    kbd_pending: bool,
}

impl PeerState {
    fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        dirs.insert("/home".to_string());
        dirs.insert("/home/alice".to_string());
        dirs.insert("/tmp".to_string());
        Self {
            codec: FrameCodec::default(),
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            banner: PEER_BANNER.to_string(),
            client_banner: None,
            password: PASSWORD.to_string(),
            otp: OTP.to_string(),
            allow_none: false,
            authorized_keys: Vec::new(),
            auth_log: Vec::new(),
            window: 2 * 1024 * 1024,
            posix_rename: true,
            readdir_batch: 2,
            fail_handshake: false,
            connect_delays: 0,
            block_sends: 0,
            block_recvs: 0,
            hung_up: false,
            client_disconnect: None,
            ignores: 0,
            forwards: Vec::new(),
            channels: HashMap::new(),
            rejected: Vec::new(),
            next_channel: 100,
            files: BTreeMap::new(),
            dirs,
            links: BTreeMap::new(),
            setstat_log: Vec::new(),
            handles: HashMap::new(),
            next_handle: 0,
            kbd_pending: false,
        }
    }

    /// Server side channel the session knows as `client_id`.
    pub fn channel_for(&self, client_id: u32) -> Option<&PeerChannel> {
        self.channels
            .values()
            .find(|ch| ch.client_id == Some(client_id))
    }

    fn server_id_for(&self, client_id: u32) -> Option<u32> {
        self.channels
            .iter()
            .find(|(_, ch)| ch.client_id == Some(client_id))
            .map(|(id, _)| *id)
    }

    fn frame(&mut self, payload: &[u8]) {
        self.codec
            .encode(payload, &mut self.outbound)
            .expect("peer frame");
    }

    fn reply(&mut self, message: &ConnectionMessage) {
        self.frame(&message.to_bytes());
    }

    fn ingest(&mut self, data: &[u8]) {
        self.inbound.extend_from_slice(data);
        while let Some(payload) = self.codec.decode(&mut self.inbound).expect("client frame") {
            self.handle(&payload);
        }
    }

    fn handle(&mut self, payload: &[u8]) {
        match MessageType::from_u8(payload[0]) {
            Some(MessageType::ServiceRequest) => {
                let mut accept = vec![MessageType::ServiceAccept as u8];
                put_string(&mut accept, b"ssh-userauth");
                self.frame(&accept);
            }
            Some(MessageType::UserauthRequest) => {
                let request = AuthRequest::from_bytes(payload).expect("auth request");
                self.authenticate(&request);
            }
            Some(MessageType::UserauthInfoResponse) => {
                let answers = parse_info_response(payload).expect("info response");
                let ok = self.kbd_pending && answers == vec![self.otp.clone()];
                self.kbd_pending = false;
                self.auth_result(ok);
            }
            Some(MessageType::Disconnect) => {
                let disconnect = Disconnect::from_bytes(payload).expect("disconnect");
                self.client_disconnect = Some(disconnect.description);
            }
            Some(MessageType::Ignore) => self.ignores += 1,
            Some(kind) if kind.is_connection() => {
                let message = ConnectionMessage::from_bytes(payload).expect("connection message");
                self.connection(message);
            }
            _ => {}
        }
    }

    fn authenticate(&mut self, request: &AuthRequest) {
        self.auth_log.push(request.method().name().to_string());
        let ok = match request.method() {
            AuthMethod::None => self.allow_none,
            AuthMethod::Password(password) => *password == self.password,
            AuthMethod::PublicKey {
                algorithm,
                public_key,
                signature: Some(signature),
            } => {
                self.authorized_keys.contains(public_key)
                    && verify_signature(
                        request.user_name(),
                        request.service_name(),
                        algorithm,
                        public_key,
                        signature,
                    )
            }
            AuthMethod::PublicKey { .. } => false,
            AuthMethod::KeyboardInteractive { .. } => {
                self.kbd_pending = true;
                let challenge = InfoRequest {
                    name: "otp".to_string(),
                    instruction: "Enter the code from your token".to_string(),
                    prompts: vec![Prompt {
                        text: "Code: ".to_string(),
                        echo: false,
                    }],
                };
                self.frame(&challenge.to_bytes());
                return;
            }
        };
        self.auth_result(ok);
    }

    fn auth_result(&mut self, ok: bool) {
        if ok {
            self.frame(&[MessageType::UserauthSuccess as u8]);
        } else {
            let methods = ["password", "publickey", "keyboard-interactive"]
                .iter()
                .map(|m| m.to_string())
                .collect();
            self.frame(&AuthFailure::new(methods, false).to_bytes());
        }
    }

    fn connection(&mut self, message: ConnectionMessage) {
        match message {
            ConnectionMessage::GlobalRequest {
                request,
                want_reply,
            } => {
                let reply = self.global_request(request);
                if want_reply {
                    self.reply(&reply);
                }
            }
            ConnectionMessage::ChannelOpen {
                channel_type,
                sender_channel,
                initial_window_size,
                maximum_packet_size,
            } => {
                let mode = match &channel_type {
                    ChannelType::Session => Mode::Idle,
                    ChannelType::DirectTcpip { host, .. } if host == "refused.example" => {
                        self.reply(&ConnectionMessage::ChannelOpenFailure {
                            recipient_channel: sender_channel,
                            reason_code: ChannelOpenFailureReason::ConnectFailed as u32,
                            description: "Connection refused".to_string(),
                        });
                        return;
                    }
                    ChannelType::DirectTcpip { .. } => Mode::Echo,
                    _ => {
                        self.reply(&ConnectionMessage::ChannelOpenFailure {
                            recipient_channel: sender_channel,
                            reason_code: ChannelOpenFailureReason::UnknownChannelType as u32,
                            description: "Unsupported".to_string(),
                        });
                        return;
                    }
                };
                let id = self.next_channel;
                self.next_channel += 1;
                self.channels.insert(
                    id,
                    PeerChannel::new(
                        Some(sender_channel),
                        initial_window_size,
                        maximum_packet_size,
                        mode,
                    ),
                );
                let window = self.window;
                self.reply(&ConnectionMessage::ChannelOpenConfirmation {
                    recipient_channel: sender_channel,
                    sender_channel: id,
                    initial_window_size: window,
                    maximum_packet_size: 32 * 1024,
                });
            }
            ConnectionMessage::ChannelOpenConfirmation {
                recipient_channel,
                sender_channel,
                initial_window_size,
                maximum_packet_size,
            } => {
                if let Some(ch) = self.channels.get_mut(&recipient_channel) {
                    ch.client_id = Some(sender_channel);
                    ch.window = initial_window_size;
                    ch.max_packet = maximum_packet_size;
                }
                self.drain(recipient_channel);
            }
            ConnectionMessage::ChannelOpenFailure {
                recipient_channel,
                reason_code,
                ..
            } => {
                self.channels.remove(&recipient_channel);
                self.rejected.push((recipient_channel, reason_code));
            }
            ConnectionMessage::ChannelWindowAdjust {
                recipient_channel,
                bytes_to_add,
            } => {
                if let Some(ch) = self.channels.get_mut(&recipient_channel) {
                    ch.window = ch.window.saturating_add(bytes_to_add);
                }
                self.drain(recipient_channel);
            }
            ConnectionMessage::ChannelData {
                recipient_channel,
                data,
            } => self.channel_data(recipient_channel, &data),
            ConnectionMessage::ChannelExtendedData {
                recipient_channel,
                data,
                ..
            } => {
                if let Some(ch) = self.channels.get_mut(&recipient_channel) {
                    ch.stderr_received.extend_from_slice(&data);
                }
            }
            ConnectionMessage::ChannelEof { recipient_channel } => {
                let Some(ch) = self.channels.get_mut(&recipient_channel) else {
                    return;
                };
                ch.eof_received = true;
                if matches!(ch.mode, Mode::Echo | Mode::ScpSink { .. }) {
                    self.finish(recipient_channel, 0);
                    self.drain(recipient_channel);
                }
            }
            ConnectionMessage::ChannelClose { recipient_channel } => {
                let Some(ch) = self.channels.get_mut(&recipient_channel) else {
                    return;
                };
                let already = ch.close_sent;
                let client_id = ch.client_id;
                self.channels.remove(&recipient_channel);
                if let (false, Some(client)) = (already, client_id) {
                    self.reply(&ConnectionMessage::ChannelClose {
                        recipient_channel: client,
                    });
                }
            }
            ConnectionMessage::ChannelRequest {
                recipient_channel,
                request,
                want_reply,
            } => {
                let ok = self.channel_request(recipient_channel, request);
                let client = self
                    .channels
                    .get(&recipient_channel)
                    .and_then(|ch| ch.client_id);
                if let (true, Some(client)) = (want_reply, client) {
                    let reply = if ok {
                        ConnectionMessage::ChannelSuccess {
                            recipient_channel: client,
                        }
                    } else {
                        ConnectionMessage::ChannelFailure {
                            recipient_channel: client,
                        }
                    };
                    // Replies go ahead of anything the request produced.
                    self.reply(&reply);
                }
                self.drain(recipient_channel);
            }
            _ => {}
        }
    }

    fn global_request(&mut self, request: GlobalRequestType) -> ConnectionMessage {
        match request {
            GlobalRequestType::TcpipForward { address, .. } if address == "deny.example" => {
                ConnectionMessage::RequestFailure
            }
            GlobalRequestType::TcpipForward { address, port } => {
                let bound = if port == 0 { BOUND_PORT } else { port };
                self.forwards.push((address, bound));
                let data = if port == 0 {
                    bound.to_be_bytes().to_vec()
                } else {
                    Vec::new()
                };
                ConnectionMessage::RequestSuccess { data }
            }
            GlobalRequestType::CancelTcpipForward { address, port } => {
                let before = self.forwards.len();
                self.forwards.retain(|(a, p)| !(*a == address && *p == port));
                if self.forwards.len() < before {
                    ConnectionMessage::RequestSuccess { data: Vec::new() }
                } else {
                    ConnectionMessage::RequestFailure
                }
            }
            GlobalRequestType::Other { .. } => ConnectionMessage::RequestFailure,
        }
    }

    /// Applies a channel request and returns whether it succeeded. Output
    /// is queued on the channel and drained after the reply.
    fn channel_request(&mut self, id: u32, request: ChannelRequestType) -> bool {
        let Some(ch) = self.channels.get_mut(&id) else {
            return false;
        };
        ch.requests.push(request.name().to_string());
        match request {
            ChannelRequestType::Exec { command } => self.exec(id, &command),
            ChannelRequestType::Shell => {
                ch.mode = Mode::Echo;
                true
            }
            ChannelRequestType::Subsystem { name } if name == "sftp" => {
                ch.mode = Mode::Sftp;
                true
            }
            ChannelRequestType::Subsystem { .. } => false,
            ChannelRequestType::Env { name, .. } => name.starts_with("LC_") || name == "LANG",
            ChannelRequestType::PtyReq { .. }
            | ChannelRequestType::WindowChange { .. }
            | ChannelRequestType::X11Req { .. }
            | ChannelRequestType::Signal { .. } => true,
            _ => false,
        }
    }

    fn exec(&mut self, id: u32, command: &str) -> bool {
        if let Some(path) = command.strip_prefix("scp -t ") {
            let path = unquote(path);
            let denied = path.starts_with("/denied");
            self.set_mode(
                id,
                Mode::ScpSink {
                    path: path.clone(),
                    stage: SinkStage::Header,
                },
            );
            if denied {
                let message = format!("\x02scp: {}: Permission denied\n", path);
                self.queue_data(id, 0, message.as_bytes());
                self.finish(id, 1);
            } else {
                self.queue_data(id, 0, &[0]);
            }
            return true;
        }
        if let Some(path) = command.strip_prefix("scp -f ") {
            let path = unquote(path);
            self.set_mode(
                id,
                Mode::ScpSource {
                    path,
                    stage: SourceStage::Start,
                },
            );
            return true;
        }
        if let Some(text) = command.strip_prefix("echo ") {
            self.queue_data(id, 0, format!("{}\n", text).as_bytes());
            self.finish(id, 0);
            return true;
        }
        if let Some(size) = command.strip_prefix("yes ") {
            let size: usize = size.parse().unwrap_or(0);
            let data: Vec<u8> = (0..size).map(|i| b'a' + (i % 26) as u8).collect();
            self.queue_data(id, 0, &data);
            self.finish(id, 0);
            return true;
        }
        match command {
            "cat" => {
                self.set_mode(id, Mode::Echo);
                true
            }
            "fail" => {
                self.queue_data(id, 1, b"boom\n");
                self.finish(id, 3);
                true
            }
            "crash" => {
                let client = self.channels.get(&id).and_then(|ch| ch.client_id);
                if let Some(client) = client {
                    self.queue(
                        id,
                        Out::Message(ConnectionMessage::ChannelRequest {
                            recipient_channel: client,
                            request: ChannelRequestType::ExitSignal {
                                signal_name: "SEGV".to_string(),
                                core_dumped: true,
                                error_message: "Segmentation fault".to_string(),
                                language_tag: String::new(),
                            },
                            want_reply: false,
                        }),
                    );
                    self.queue_close(id);
                }
                true
            }
            "sleep" => {
                self.set_mode(id, Mode::Silent);
                true
            }
            _ => false,
        }
    }

    fn set_mode(&mut self, id: u32, mode: Mode) {
        if let Some(ch) = self.channels.get_mut(&id) {
            ch.mode = mode;
        }
    }

    fn queue(&mut self, id: u32, out: Out) {
        if let Some(ch) = self.channels.get_mut(&id) {
            ch.backlog.push_back(out);
        }
    }

    fn queue_data(&mut self, id: u32, stream: u32, data: &[u8]) {
        self.queue(id, Out::Data(stream, data.to_vec()));
    }

    fn queue_close(&mut self, id: u32) {
        let client = self.channels.get(&id).and_then(|ch| ch.client_id);
        if let Some(client) = client {
            self.queue(
                id,
                Out::Message(ConnectionMessage::ChannelEof {
                    recipient_channel: client,
                }),
            );
            self.queue(
                id,
                Out::Message(ConnectionMessage::ChannelClose {
                    recipient_channel: client,
                }),
            );
        }
    }

    /// Queues exit-status, EOF and CLOSE; callers drain.
    fn finish(&mut self, id: u32, status: u32) {
        let client = self.channels.get(&id).and_then(|ch| ch.client_id);
        if let Some(client) = client {
            self.queue(
                id,
                Out::Message(ConnectionMessage::ChannelRequest {
                    recipient_channel: client,
                    request: ChannelRequestType::ExitStatus {
                        exit_status: status,
                    },
                    want_reply: false,
                }),
            );
            self.queue_close(id);
        }
    }

    /// Sends queued output as far as the session's window allows.
    fn drain(&mut self, id: u32) {
        let Some(ch) = self.channels.get_mut(&id) else {
            return;
        };
        let Some(client) = ch.client_id else {
            return;
        };
        let mut frames = Vec::new();
        while let Some(front) = ch.backlog.front_mut() {
            let done = match front {
                Out::Data(_, data) if data.is_empty() => true,
                Out::Data(stream, data) => {
                    let n = data
                        .len()
                        .min(ch.window as usize)
                        .min(ch.max_packet.max(1) as usize);
                    if n == 0 {
                        break;
                    }
                    let chunk: Vec<u8> = data.drain(..n).collect();
                    ch.window -= n as u32;
                    let message = if *stream == 0 {
                        ConnectionMessage::ChannelData {
                            recipient_channel: client,
                            data: chunk,
                        }
                    } else {
                        ConnectionMessage::ChannelExtendedData {
                            recipient_channel: client,
                            data_type: *stream,
                            data: chunk,
                        }
                    };
                    frames.push(message.to_bytes());
                    data.is_empty()
                }
                Out::Message(message) => {
                    if matches!(message, ConnectionMessage::ChannelClose { .. }) {
                        ch.close_sent = true;
                    }
                    frames.push(message.to_bytes());
                    true
                }
            };
            if done {
                ch.backlog.pop_front();
            }
        }
        for frame in frames {
            self.frame(&frame);
        }
    }

    fn channel_data(&mut self, id: u32, data: &[u8]) {
        let Some(ch) = self.channels.get_mut(&id) else {
            return;
        };
        ch.received.extend_from_slice(data);
        match ch.mode.clone() {
            Mode::Echo => {
                self.queue_data(id, 0, data);
                self.drain(id);
            }
            Mode::Sftp => {
                ch.rx.extend_from_slice(data);
                let mut rx = std::mem::take(&mut ch.rx);
                let mut replies = Vec::new();
                while let Some(message) = SftpMessage::decode(&mut rx).expect("sftp packet") {
                    replies.push(self.sftp(&message).to_message().to_bytes());
                }
                if let Some(ch) = self.channels.get_mut(&id) {
                    ch.rx = rx;
                }
                for reply in replies {
                    self.queue_data(id, 0, &reply);
                }
                self.drain(id);
            }
            Mode::ScpSink { path, stage } => {
                ch.rx.extend_from_slice(data);
                self.scp_sink(id, path, stage);
            }
            Mode::ScpSource { path, stage } => {
                let acks = data.iter().filter(|b| **b == 0).count();
                self.scp_source(id, path, stage, acks);
            }
            Mode::Idle | Mode::Silent => {}
        }
    }

    fn scp_sink(&mut self, id: u32, path: String, mut stage: SinkStage) {
        loop {
            let Some(ch) = self.channels.get_mut(&id) else {
                return;
            };
            match stage.clone() {
                SinkStage::Header => {
                    let Some(end) = ch.rx.iter().position(|b| *b == b'\n') else {
                        break;
                    };
                    let line = ch.rx.split_to(end + 1);
                    let line = String::from_utf8_lossy(&line[..end]).to_string();
                    if line.starts_with('T') {
                        self.queue_data(id, 0, &[0]);
                        continue;
                    }
                    let mut parts = line[1..].splitn(3, ' ');
                    let _mode = parts.next();
                    let size: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                    let name = parts.next().unwrap_or_default().to_string();
                    ch.scp_file.clear();
                    stage = SinkStage::Data {
                        name,
                        remaining: size,
                    };
                    self.queue_data(id, 0, &[0]);
                }
                SinkStage::Data { name, remaining } => {
                    if remaining == 0 {
                        stage = SinkStage::Trailer { name };
                        continue;
                    }
                    if ch.rx.is_empty() {
                        break;
                    }
                    let n = ch.rx.len().min(remaining as usize);
                    let chunk = ch.rx.split_to(n);
                    ch.scp_file.extend_from_slice(&chunk);
                    stage = SinkStage::Data {
                        name,
                        remaining: remaining - n as u64,
                    };
                }
                SinkStage::Trailer { name } => {
                    if ch.rx.is_empty() {
                        break;
                    }
                    let _ = ch.rx.split_to(1);
                    let contents = std::mem::take(&mut ch.scp_file);
                    let target = if self.dirs.contains(&path) {
                        format!("{}/{}", path.trim_end_matches('/'), name)
                    } else {
                        path.clone()
                    };
                    self.files.insert(target, contents);
                    self.queue_data(id, 0, &[0]);
                    stage = SinkStage::Done;
                }
                SinkStage::Done => break,
            }
        }
        self.set_mode(
            id,
            Mode::ScpSink {
                path,
                stage: stage.clone(),
            },
        );
        self.drain(id);
    }

    fn scp_source(&mut self, id: u32, path: String, mut stage: SourceStage, acks: usize) {
        for _ in 0..acks {
            match stage {
                SourceStage::Start => match self.files.get(&path).cloned() {
                    Some(contents) => {
                        let name = path.rsplit('/').next().unwrap_or_default();
                        let header = format!("C0640 {} {}\n", contents.len(), name);
                        self.queue_data(id, 0, header.as_bytes());
                        stage = SourceStage::HeaderSent;
                    }
                    None => {
                        let message = format!("\x01scp: {}: No such file or directory\n", path);
                        self.queue_data(id, 0, message.as_bytes());
                        self.finish(id, 1);
                        stage = SourceStage::Done;
                    }
                },
                SourceStage::HeaderSent => {
                    let mut contents = self.files.get(&path).cloned().unwrap_or_default();
                    contents.push(0);
                    self.queue_data(id, 0, &contents);
                    stage = SourceStage::DataSent;
                }
                SourceStage::DataSent => {
                    self.finish(id, 0);
                    stage = SourceStage::Done;
                }
                SourceStage::Done => {}
            }
        }
        self.set_mode(
            id,
            Mode::ScpSource {
                path,
                stage: stage.clone(),
            },
        );
        self.drain(id);
    }

    fn sftp(&mut self, message: &SftpMessage) -> SftpResponse {
        let (id, request) = match SftpRequest::from_message(message) {
            Ok(parsed) => parsed,
            Err(_) => {
                return SftpResponse::status(0, SftpErrorCode::BadMessage, "bad message");
            }
        };
        let ok = SftpResponse::status(id, SftpErrorCode::Ok, "Success");
        let missing = SftpResponse::status(id, SftpErrorCode::NoSuchFile, "No such file");
        let failure = SftpResponse::status(id, SftpErrorCode::Failure, "Failure");

        match request {
            SftpRequest::Init { .. } => {
                let mut extensions = Vec::new();
                if self.posix_rename {
                    extensions.push((POSIX_RENAME.to_string(), "1".to_string()));
                }
                SftpResponse::Version {
                    version: SFTP_VERSION,
                    extensions,
                }
            }
            SftpRequest::Open { path, flags, .. } => {
                let exists = self.files.contains_key(&path);
                if !exists && flags & SSH_FXF_CREAT == 0 {
                    return missing;
                }
                if exists && flags & SSH_FXF_EXCL != 0 {
                    return failure;
                }
                if flags & SSH_FXF_WRITE != 0 && (!exists || flags & SSH_FXF_TRUNC != 0) {
                    self.files.insert(path.clone(), Vec::new());
                }
                let handle = self.new_handle(SftpTarget::File(path));
                SftpResponse::Handle { id, handle }
            }
            SftpRequest::OpenDir { path } => {
                if !self.dirs.contains(&path) {
                    return missing;
                }
                let handle = self.new_handle(SftpTarget::Dir { path, served: 0 });
                SftpResponse::Handle { id, handle }
            }
            SftpRequest::Close { handle } => match self.handles.remove(&handle) {
                Some(_) => ok,
                None => failure,
            },
            SftpRequest::Read {
                handle,
                offset,
                len,
            } => {
                let Some(SftpTarget::File(path)) = self.handles.get(&handle) else {
                    return failure;
                };
                let contents = self.files.get(path).cloned().unwrap_or_default();
                let start = offset as usize;
                if start >= contents.len() {
                    return SftpResponse::status(id, SftpErrorCode::Eof, "End of file");
                }
                let end = contents.len().min(start + len as usize);
                SftpResponse::Data {
                    id,
                    data: contents[start..end].to_vec(),
                }
            }
            SftpRequest::Write {
                handle,
                offset,
                data,
            } => {
                let Some(SftpTarget::File(path)) = self.handles.get(&handle).cloned() else {
                    return failure;
                };
                let contents = self.files.entry(path).or_default();
                let start = offset as usize;
                if contents.len() < start + data.len() {
                    contents.resize(start + data.len(), 0);
                }
                contents[start..start + data.len()].copy_from_slice(&data);
                ok
            }
            SftpRequest::ReadDir { handle } => {
                let Some(SftpTarget::Dir { path, served }) = self.handles.get(&handle).cloned()
                else {
                    return failure;
                };
                let batch: Vec<String> = self
                    .children(&path)
                    .into_iter()
                    .skip(served)
                    .take(self.readdir_batch.max(1))
                    .collect();
                if batch.is_empty() {
                    return SftpResponse::status(id, SftpErrorCode::Eof, "End of directory");
                }
                self.handles.insert(
                    handle,
                    SftpTarget::Dir {
                        path,
                        served: served + batch.len(),
                    },
                );
                let entries = batch
                    .into_iter()
                    .map(|child| {
                        let attrs = self.attrs(&child, false).unwrap_or_default();
                        let filename = child.rsplit('/').next().unwrap_or_default().to_string();
                        DirEntry {
                            longname: format!("-rw-r--r-- 1 alice alice {}", filename),
                            filename,
                            attrs,
                        }
                    })
                    .collect();
                SftpResponse::Name { id, entries }
            }
            SftpRequest::Stat { path } => match self.attrs(&path, true) {
                Some(attrs) => SftpResponse::Attrs { id, attrs },
                None => missing,
            },
            SftpRequest::LStat { path } => match self.attrs(&path, false) {
                Some(attrs) => SftpResponse::Attrs { id, attrs },
                None => missing,
            },
            SftpRequest::FStat { handle } => {
                let path = match self.handles.get(&handle) {
                    Some(SftpTarget::File(path)) => path.clone(),
                    Some(SftpTarget::Dir { path, .. }) => path.clone(),
                    None => return failure,
                };
                match self.attrs(&path, true) {
                    Some(attrs) => SftpResponse::Attrs { id, attrs },
                    None => missing,
                }
            }
            SftpRequest::SetStat { path, attrs } => {
                if self.attrs(&path, true).is_none() {
                    return missing;
                }
                self.setstat_log.push((path, attrs));
                ok
            }
            SftpRequest::Remove { path } => match self.files.remove(&path) {
                Some(_) => ok,
                None => match self.links.remove(&path) {
                    Some(_) => ok,
                    None => missing,
                },
            },
            SftpRequest::MkDir { path, .. } => {
                if self.exists(&path) {
                    return failure;
                }
                self.dirs.insert(path);
                ok
            }
            SftpRequest::RmDir { path } => {
                if !self.dirs.contains(&path) {
                    return missing;
                }
                if !self.children(&path).is_empty() {
                    return failure;
                }
                self.dirs.remove(&path);
                ok
            }
            SftpRequest::RealPath { path } => {
                let resolved = normalize(&path);
                SftpResponse::Name {
                    id,
                    entries: vec![DirEntry {
                        filename: resolved.clone(),
                        longname: resolved,
                        attrs: FileAttributes::new(),
                    }],
                }
            }
            SftpRequest::Rename { old_path, new_path } => {
                if self.exists(&new_path) {
                    return failure;
                }
                self.move_file(&old_path, &new_path, id)
            }
            SftpRequest::Extended { name, data } if name == POSIX_RENAME => {
                let mut offset = 0;
                let old_path = take_string(&data, &mut offset);
                let new_path = take_string(&data, &mut offset);
                self.files.remove(&new_path);
                self.move_file(&old_path, &new_path, id)
            }
            SftpRequest::Extended { .. } => {
                SftpResponse::status(id, SftpErrorCode::OpUnsupported, "Unsupported")
            }
            SftpRequest::ReadLink { path } => match self.links.get(&path) {
                Some(target) => SftpResponse::Name {
                    id,
                    entries: vec![DirEntry {
                        filename: target.clone(),
                        longname: target.clone(),
                        attrs: FileAttributes::new(),
                    }],
                },
                None => missing,
            },
            SftpRequest::Symlink { target, link_path } => {
                if self.exists(&link_path) {
                    return failure;
                }
                self.links.insert(link_path, target);
                ok
            }
        }
    }

    fn new_handle(&mut self, target: SftpTarget) -> Vec<u8> {
        let handle = format!("handle-{}", self.next_handle).into_bytes();
        self.next_handle += 1;
        self.handles.insert(handle.clone(), target);
        handle
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path) || self.links.contains_key(path)
    }

    fn move_file(&mut self, old_path: &str, new_path: &str, id: u32) -> SftpResponse {
        match self.files.remove(old_path) {
            Some(contents) => {
                self.files.insert(new_path.to_string(), contents);
                SftpResponse::status(id, SftpErrorCode::Ok, "Success")
            }
            None => SftpResponse::status(id, SftpErrorCode::NoSuchFile, "No such file"),
        }
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let mut children: Vec<String> = self
            .files
            .keys()
            .chain(self.dirs.iter())
            .chain(self.links.keys())
            .filter(|path| path.as_str() != dir && parent(path) == dir)
            .cloned()
            .collect();
        children.sort();
        children
    }

    fn attrs(&self, path: &str, follow: bool) -> Option<FileAttributes> {
        if let Some(target) = self.links.get(path) {
            if !follow {
                return Some(FileAttributes::new().with_permissions(0o120777));
            }
            return self.attrs(target, false);
        }
        if let Some(contents) = self.files.get(path) {
            return Some(
                FileAttributes::new()
                    .with_size(contents.len() as u64)
                    .with_permissions(0o100644),
            );
        }
        if self.dirs.contains(path) {
            return Some(FileAttributes::new().with_size(4096).with_permissions(0o040755));
        }
        None
    }
}

fn verify_signature(
    user: &str,
    service: &str,
    algorithm: &str,
    public_key: &[u8],
    signature: &[u8],
) -> bool {
    let mut offset = 0;
    let _algorithm = take_string(public_key, &mut offset);
    let raw = take_bytes(public_key, &mut offset);
    let mut offset = 0;
    let _algorithm = take_string(signature, &mut offset);
    let sig = take_bytes(signature, &mut offset);

    let Ok(raw) = <[u8; 32]>::try_from(raw.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&raw) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig) else {
        return false;
    };
    let data = construct_signature_data(&SESSION_ID, user, service, algorithm, public_key);
    key.verify(&data, &sig).is_ok()
}

fn put_string(buf: &mut Vec<u8>, value: &[u8]) {
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value);
}

fn take_bytes(data: &[u8], offset: &mut usize) -> Vec<u8> {
    let Some(len) = data.get(*offset..*offset + 4) else {
        return Vec::new();
    };
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    *offset += 4;
    let value = data.get(*offset..*offset + len).unwrap_or_default().to_vec();
    *offset += len;
    value
}

fn take_string(data: &[u8], offset: &mut usize) -> String {
    String::from_utf8_lossy(&take_bytes(data, offset)).to_string()
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    match value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
        Some(inner) => inner.replace("'\\''", "'"),
        None => value.to_string(),
    }
}

fn parent(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => "",
    }
}

fn normalize(path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/home/alice/{}", path)
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Handle to the shared peer state.
#[derive(Clone)]
pub struct Peer {
    state: Arc<Mutex<PeerState>>,
}

impl Peer {
    pub fn new() -> Self {
        init_tracing();
        Self {
            state: Arc::new(Mutex::new(PeerState::new())),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().expect("peer state")
    }

    pub fn provider(&self) -> PeerProvider {
        PeerProvider { peer: self.clone() }
    }

    /// Opens a channel towards the session and returns the server's number
    /// for it. `channel_type` must be X11 or ForwardedTcpip.
    pub fn open_channel(&self, channel_type: ChannelType) -> u32 {
        let mut st = self.state();
        let id = st.next_channel;
        st.next_channel += 1;
        st.channels
            .insert(id, PeerChannel::new(None, 0, 32 * 1024, Mode::Echo));
        let window = st.window;
        st.reply(&ConnectionMessage::ChannelOpen {
            channel_type,
            sender_channel: id,
            initial_window_size: window,
            maximum_packet_size: 32 * 1024,
        });
        id
    }

    pub fn open_x11(&self) -> u32 {
        self.open_channel(ChannelType::X11 {
            originator_address: "10.0.0.7".to_string(),
            originator_port: 6010,
        })
    }

    pub fn open_forwarded(&self, address: &str, port: u32) -> u32 {
        self.open_channel(ChannelType::ForwardedTcpip {
            connected_address: address.to_string(),
            connected_port: port,
            originator_address: "203.0.113.9".to_string(),
            originator_port: 51000,
        })
    }

    /// Sends data on the peer's channel `id` as soon as the window allows.
    pub fn send(&self, id: u32, data: &[u8]) {
        let mut st = self.state();
        st.queue_data(id, 0, data);
        st.drain(id);
    }

    /// Grants the session `bytes` more credit on its channel `client_id`.
    pub fn grant(&self, client_id: u32, bytes: u32) {
        let mut st = self.state();
        st.reply(&ConnectionMessage::ChannelWindowAdjust {
            recipient_channel: client_id,
            bytes_to_add: bytes,
        });
    }

    /// Closes the peer's side of the session's channel `client_id`.
    pub fn close(&self, client_id: u32) {
        let mut st = self.state();
        if let Some(id) = st.server_id_for(client_id) {
            st.queue_close(id);
            st.drain(id);
        }
    }

    pub fn disconnect(&self, description: &str) {
        let mut st = self.state();
        let message = Disconnect::new(DisconnectReason::ByApplication, description).to_bytes();
        st.frame(&message);
        st.hung_up = true;
    }

    pub fn hang_up(&self) {
        self.state().hung_up = true;
    }

    pub fn data_for(&self, client_id: u32) -> Vec<u8> {
        self.state()
            .channel_for(client_id)
            .map(|ch| ch.received.clone())
            .unwrap_or_default()
    }

    pub fn requests_for(&self, client_id: u32) -> Vec<String> {
        self.state()
            .channel_for(client_id)
            .map(|ch| ch.requests.clone())
            .unwrap_or_default()
    }

    pub fn put_file(&self, path: &str, contents: &[u8]) {
        self.state().files.insert(path.to_string(), contents.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).cloned()
    }
}

impl Default for Peer {
    fn default() -> Self {
        Self::new()
    }
}

/// Loopback stream: writes go straight into the peer.
pub struct PeerStream {
    peer: Peer,
}

impl SecureStream for PeerStream {
    fn send(&mut self, data: &[u8]) -> TetherResult<usize> {
        let mut st = self.peer.state();
        if st.block_sends > 0 {
            st.block_sends -= 1;
            return Err(TetherError::WouldBlock(Direction::Writable));
        }
        if !st.hung_up {
            st.ingest(data);
        }
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> TetherResult<usize> {
        let mut st = self.peer.state();
        if st.block_recvs > 0 {
            st.block_recvs -= 1;
            return Err(TetherError::WouldBlock(Direction::Readable));
        }
        if st.outbound.is_empty() {
            return if st.hung_up {
                Ok(0)
            } else {
                Err(TetherError::WouldBlock(Direction::Readable))
            };
        }
        let n = buf.len().min(st.outbound.len());
        let chunk = st.outbound.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }

    fn wait(&mut self, _direction: Direction, timeout: Option<Duration>) -> TetherResult<bool> {
        {
            let st = self.peer.state();
            if !st.outbound.is_empty() || st.hung_up {
                return Ok(true);
            }
        }
        let pause = timeout
            .unwrap_or(Duration::from_millis(1))
            .min(Duration::from_millis(1));
        std::thread::sleep(pause);
        let st = self.peer.state();
        Ok(!st.outbound.is_empty() || st.hung_up)
    }
}

/// Hands the session an already-secured loopback stream.
pub struct PeerProvider {
    peer: Peer,
}

impl SecurityProvider for PeerProvider {
    fn connect(&mut self, local_banner: &str) -> TetherResult<Established> {
        let mut st = self.peer.state();
        if st.connect_delays > 0 {
            st.connect_delays -= 1;
            return Err(TetherError::WouldBlock(Direction::Both));
        }
        if st.fail_handshake {
            return Err(TetherError::Handshake("No common cipher".to_string()));
        }
        st.client_banner = Some(local_banner.to_string());
        Ok(Established {
            stream: Box::new(PeerStream {
                peer: self.peer.clone(),
            }),
            remote_banner: st.banner.clone(),
            host_key: HOST_KEY.to_vec(),
            session_id: SESSION_ID.to_vec(),
            methods: NegotiatedMethods {
                kex: "curve25519-sha256".to_string(),
                host_key: "ssh-ed25519".to_string(),
                cipher_client_to_server: "chacha20-poly1305@openssh.com".to_string(),
                cipher_server_to_client: "chacha20-poly1305@openssh.com".to_string(),
                ..NegotiatedMethods::default()
            },
        })
    }

    fn wait(&mut self, _direction: Direction, timeout: Option<Duration>) -> TetherResult<bool> {
        std::thread::sleep(timeout.unwrap_or_default().min(Duration::from_millis(1)));
        Ok(true)
    }
}

/// Routes session logs to the test output; `RUST_LOG=tether_proto=debug`
/// shows the message flow of a failing test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short timeout so failing tests do not hang.
pub fn config() -> SessionConfig {
    SessionConfig::default().with_timeout(Duration::from_secs(2))
}

/// A blocking session, started and authenticated with the password.
pub fn connect(peer: &Peer) -> Session {
    connect_with(peer, config())
}

/// Like [`connect`] with a custom configuration.
pub fn connect_with(peer: &Peer, config: SessionConfig) -> Session {
    let mut session = Session::with_config(config).expect("config");
    session.bind(peer.provider()).expect("bind");
    session.startup().expect("startup");
    session
        .authenticate(USER, &Credentials::password(PASSWORD))
        .expect("authenticate");
    session
}

/// Like [`connect`], then switched to non-blocking mode.
pub fn connect_nonblocking(peer: &Peer) -> Session {
    let mut session = connect(peer);
    session.set_blocking(false);
    session
}

/// Repeats a non-blocking call until it stops returning `WouldBlock`.
pub fn retry<T>(mut op: impl FnMut() -> TetherResult<T>) -> TetherResult<T> {
    for _ in 0..10_000 {
        match op() {
            Err(TetherError::WouldBlock(_)) => continue,
            other => return other,
        }
    }
    panic!("operation kept returning WouldBlock");
}
