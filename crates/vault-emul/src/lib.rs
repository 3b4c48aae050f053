//! # vault-emul
//!
//! An in-process device emulator implementing the [`Transport`] trait.
//! It synthesizes the replies a real device would send: a credential
//! store keyed by context, a parameter table, data-node streaming, and a
//! flash node array served through the memory-management commands.
//!
//! Replies are produced synchronously into an outbox the engine drains
//! with its `pump`; tests control exactly when replies are observed.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use rand::RngCore;
use tracing::debug;
use vault_common::types::Address;
use vault_common::{FAVORITES_COUNT, MAX_DESCRIPTION_LENGTH, NODE_SIZE};
use vault_db::{FavoriteSlot, Node, NodeKind, NodeRef};
use vault_proto::{CommandId, Frame, Packet};
use vault_transport::{Transport, TransportError, TransportResult};

/// One stored credential context.
#[derive(Debug, Clone, Default)]
struct CredEntry {
    login: String,
    password: String,
    description: String,
}

/// Emulated device.
pub struct EmulDevice {
    outbox: VecDeque<Frame>,
    wire_log: Vec<Packet>,

    flash_mb: u8,
    hw_version: String,
    status_byte: u8,
    serial: u32,
    uid: u64,
    params: HashMap<u8, u8>,
    change_numbers: (u8, u8),

    creds: BTreeMap<String, CredEntry>,
    context: Option<String>,

    data: BTreeMap<String, Vec<u8>>,
    data_context: Option<String>,
    read_offset: usize,
    write_buf: Vec<u8>,

    mem_mgmt: bool,
    flash: BTreeMap<u16, [u8; NODE_SIZE]>,
    start_cred: Address,
    start_data: Address,
    ctr: Vec<u8>,
    cpz_records: Vec<Vec<u8>>,
    favorites: Vec<FavoriteSlot>,

    refuse: HashSet<u8>,
}

impl EmulDevice {
    /// Creates an emulated device reporting the given version.
    #[must_use]
    pub fn new(flash_mb: u8, hw_version: &str) -> Self {
        Self {
            outbox: VecDeque::new(),
            wire_log: Vec::new(),
            flash_mb,
            hw_version: hw_version.to_string(),
            status_byte: 0b0101,
            serial: 0x0001_0203,
            uid: 0xDEAD_BEEF_CAFE_0001,
            params: HashMap::new(),
            change_numbers: (1, 1),
            creds: BTreeMap::new(),
            context: None,
            data: BTreeMap::new(),
            data_context: None,
            read_offset: 0,
            write_buf: Vec::new(),
            mem_mgmt: false,
            flash: BTreeMap::new(),
            start_cred: Address::EMPTY,
            start_data: Address::EMPTY,
            ctr: vec![0, 0, 0],
            cpz_records: Vec::new(),
            favorites: vec![FavoriteSlot::EMPTY; FAVORITES_COUNT],
            refuse: HashSet::new(),
        }
    }

    /// Everything the engine has sent, in order.
    #[must_use]
    pub fn wire_log(&self) -> &[Packet] {
        &self.wire_log
    }

    /// True once a cancel packet was observed.
    #[must_use]
    pub fn cancel_seen(&self) -> bool {
        self.wire_log
            .iter()
            .any(|p| p.cmd_byte() == CommandId::CancelUserRequest.as_u8())
    }

    /// Sets the status byte returned by status probes.
    pub fn set_status(&mut self, byte: u8) {
        self.status_byte = byte;
    }

    /// Seeds a parameter value.
    pub fn set_param(&mut self, id: u8, value: u8) {
        self.params.insert(id, value);
    }

    /// Makes the device refuse a command until allowed again.
    pub fn refuse(&mut self, cmd: CommandId) {
        self.refuse.insert(cmd.as_u8());
    }

    /// Stops refusing a command.
    pub fn allow(&mut self, cmd: CommandId) {
        self.refuse.remove(&cmd.as_u8());
    }

    /// Stores a credential in the application-level store.
    pub fn add_credential(&mut self, service: &str, login: &str, password: &str, desc: &str) {
        self.creds.insert(
            service.to_string(),
            CredEntry {
                login: login.to_string(),
                password: password.to_string(),
                description: desc.to_string(),
            },
        );
    }

    /// The stored data blob for a service, if any.
    #[must_use]
    pub fn data_blob(&self, service: &str) -> Option<&Vec<u8>> {
        self.data.get(service)
    }

    /// Adds a CPZ/CTR record the scan prelude will report.
    pub fn add_cpz_record(&mut self, record: Vec<u8>) {
        self.cpz_records.push(record);
    }

    /// Sets a favorite slot.
    pub fn set_favorite(&mut self, slot: usize, parent: Address, child: Address) {
        self.favorites[slot] = FavoriteSlot { parent, child };
    }

    /// Direct access to the flash node array for corruption tests.
    pub fn flash_mut(&mut self) -> &mut BTreeMap<u16, [u8; NODE_SIZE]> {
        &mut self.flash
    }

    /// Installs a credential tree in flash: parents in the given chain
    /// order, each with one child per login. Parents are linked in the
    /// order given, which is also what the chain scan will walk.
    pub fn install_cred_tree(&mut self, entries: &[(&str, &[&str])]) {
        let parent_addr = |i: usize| Address::from_page_and_slot(130 + i as u16, 0);
        let child_addr = |i: usize, j: usize| Address::from_page_and_slot(300 + i as u16, j as u8);

        for (i, (service, logins)) in entries.iter().enumerate() {
            let mut parent = Node::minted(
                NodeKind::ParentCred,
                vault_common::types::VirtualAddr::new(0),
            );
            parent.set_addr(parent_addr(i));
            parent.set_service(service);
            if i > 0 {
                parent.set_prev_ref(NodeRef::Addr(parent_addr(i - 1)));
            }
            if i + 1 < entries.len() {
                parent.set_next_ref(NodeRef::Addr(parent_addr(i + 1)));
            }
            if !logins.is_empty() {
                parent.set_first_child_ref(NodeRef::Addr(child_addr(i, 0)));
            }
            self.flash.insert(parent.addr().as_u16(), *parent.image());

            for (j, login) in logins.iter().enumerate() {
                let mut child = Node::minted(
                    NodeKind::ChildCred,
                    vault_common::types::VirtualAddr::new(0),
                );
                child.set_addr(child_addr(i, j));
                child.set_login(login);
                if j > 0 {
                    child.set_prev_ref(NodeRef::Addr(child_addr(i, j - 1)));
                }
                if j + 1 < logins.len() {
                    child.set_next_ref(NodeRef::Addr(child_addr(i, j + 1)));
                }
                self.flash.insert(child.addr().as_u16(), *child.image());
            }
        }
        if !entries.is_empty() {
            self.start_cred = parent_addr(0);
        }
    }

    /// Installs a data-blob tree in flash: parents in the given chain
    /// order, each with the given number of singly-linked children.
    pub fn install_data_tree(&mut self, entries: &[(&str, usize)]) {
        let parent_addr = |i: usize| Address::from_page_and_slot(340 + i as u16, 0);
        let child_addr = |i: usize, j: usize| Address::from_page_and_slot(400 + i as u16, j as u8);

        for (i, (service, children)) in entries.iter().enumerate() {
            let mut parent = Node::minted(
                NodeKind::ParentData,
                vault_common::types::VirtualAddr::new(0),
            );
            parent.set_addr(parent_addr(i));
            parent.set_service(service);
            if i > 0 {
                parent.set_prev_ref(NodeRef::Addr(parent_addr(i - 1)));
            }
            if i + 1 < entries.len() {
                parent.set_next_ref(NodeRef::Addr(parent_addr(i + 1)));
            }
            if *children > 0 {
                parent.set_first_child_ref(NodeRef::Addr(child_addr(i, 0)));
            }
            self.flash.insert(parent.addr().as_u16(), *parent.image());

            for j in 0..*children {
                let mut child = Node::minted(
                    NodeKind::ChildData,
                    vault_common::types::VirtualAddr::new(0),
                );
                child.set_addr(child_addr(i, j));
                child.set_data_block(&[j as u8; 32]);
                if j + 1 < *children {
                    child.set_next_ref(NodeRef::Addr(child_addr(i, j + 1)));
                }
                self.flash.insert(child.addr().as_u16(), *child.image());
            }
        }
        if !entries.is_empty() {
            self.start_data = parent_addr(0);
        }
    }

    fn push_reply(&mut self, cmd: CommandId, payload: &[u8]) {
        match Packet::new(cmd, payload) {
            Ok(packet) => self.outbox.push_back(packet.into_frame()),
            Err(_) => debug!("emulator tried to build an oversized reply"),
        }
    }

    fn push_ack(&mut self, cmd: CommandId) {
        self.push_reply(cmd, &[1]);
    }

    fn push_refusal(&mut self, cmd: CommandId) {
        self.push_reply(cmd, &[0]);
    }

    fn handle(&mut self, request: Packet) {
        let Ok(cmd) = request.command() else {
            debug!(
                cmd = format_args!("{:#04x}", request.cmd_byte()),
                "unknown command, refusing"
            );
            let mut frame = *request.frame();
            frame[2] = 0;
            frame[0] = 1;
            self.outbox.push_back(frame);
            return;
        };

        if self.refuse.contains(&cmd.as_u8()) {
            self.push_refusal(cmd);
            return;
        }

        match cmd {
            CommandId::Ping => self.outbox.push_back(*request.frame()),
            CommandId::Version => {
                let mut payload = vec![self.flash_mb];
                payload.extend_from_slice(self.hw_version.as_bytes());
                self.push_reply(CommandId::Version, &payload);
            }
            CommandId::Status => {
                let byte = self.status_byte;
                self.push_reply(CommandId::Status, &[byte]);
            }
            CommandId::GetParam => {
                let id = request.first_payload_byte();
                let value = self.params.get(&id).copied().unwrap_or(0);
                self.push_reply(CommandId::GetParam, &[value]);
            }
            CommandId::SetParam => {
                let payload = request.payload();
                if payload.len() >= 2 {
                    self.params.insert(payload[0], payload[1]);
                }
                self.push_ack(CommandId::SetParam);
            }
            CommandId::GetSerial => {
                let bytes = self.serial.to_be_bytes();
                self.push_reply(CommandId::GetSerial, &bytes);
            }
            CommandId::GetUid => {
                let bytes = self.uid.to_be_bytes();
                self.push_reply(CommandId::GetUid, &bytes);
            }
            CommandId::SetDate => self.push_ack(CommandId::SetDate),
            CommandId::GetUserChangeNb => {
                let (cred, data) = self.change_numbers;
                self.push_reply(CommandId::GetUserChangeNb, &[1, cred, data]);
            }
            CommandId::GetRandomNumber => {
                let mut bytes = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                self.push_reply(CommandId::GetRandomNumber, &bytes);
            }

            CommandId::Context => {
                let service = request.payload_string();
                debug!(service = %service, "context select");
                if self.creds.contains_key(&service) {
                    self.context = Some(service);
                    self.push_ack(CommandId::Context);
                } else {
                    self.push_refusal(CommandId::Context);
                }
            }
            CommandId::AddContext => {
                let service = request.payload_string();
                if self.creds.contains_key(&service) {
                    self.push_refusal(CommandId::AddContext);
                } else {
                    self.creds.insert(service.clone(), CredEntry::default());
                    self.context = Some(service);
                    self.push_ack(CommandId::AddContext);
                }
            }
            CommandId::GetLogin => match self.current_cred() {
                Some(entry) => {
                    let mut payload = entry.login.clone().into_bytes();
                    payload.push(0);
                    self.push_reply(CommandId::GetLogin, &payload);
                }
                None => self.push_refusal(CommandId::GetLogin),
            },
            CommandId::SetLogin => {
                let login = request.payload_string();
                match self.current_cred_mut() {
                    Some(entry) => {
                        entry.login = login;
                        self.push_ack(CommandId::SetLogin);
                    }
                    None => self.push_refusal(CommandId::SetLogin),
                }
            }
            CommandId::GetPassword => match self.current_cred() {
                Some(entry) => {
                    let mut payload = entry.password.clone().into_bytes();
                    payload.push(0);
                    self.push_reply(CommandId::GetPassword, &payload);
                }
                None => self.push_refusal(CommandId::GetPassword),
            },
            CommandId::SetPassword => {
                let password = request.payload_string();
                match self.current_cred_mut() {
                    Some(entry) => {
                        entry.password = password;
                        self.push_ack(CommandId::SetPassword);
                    }
                    None => self.push_refusal(CommandId::SetPassword),
                }
            }
            CommandId::CheckPassword => {
                let candidate = request.payload_string();
                let matches = self
                    .current_cred()
                    .is_some_and(|e| e.password == candidate);
                self.push_reply(CommandId::CheckPassword, &[u8::from(matches)]);
            }
            CommandId::GetDescription => match self.current_cred() {
                Some(entry) if !entry.description.is_empty() => {
                    let mut payload = entry.description.clone().into_bytes();
                    payload.push(0);
                    self.push_reply(CommandId::GetDescription, &payload);
                }
                _ => self.push_refusal(CommandId::GetDescription),
            },
            CommandId::SetDescription => {
                let description = request.payload_string();
                if description.len() > MAX_DESCRIPTION_LENGTH {
                    self.push_refusal(CommandId::SetDescription);
                    return;
                }
                match self.current_cred_mut() {
                    Some(entry) => {
                        entry.description = description;
                        self.push_ack(CommandId::SetDescription);
                    }
                    None => self.push_refusal(CommandId::SetDescription),
                }
            }

            CommandId::SetDataService => {
                let service = request.payload_string();
                if self.data.contains_key(&service) {
                    self.data_context = Some(service);
                    self.read_offset = 0;
                    self.write_buf.clear();
                    self.push_ack(CommandId::SetDataService);
                } else {
                    self.push_refusal(CommandId::SetDataService);
                }
            }
            CommandId::AddDataService => {
                let service = request.payload_string();
                if self.data.contains_key(&service) {
                    self.push_refusal(CommandId::AddDataService);
                } else {
                    self.data.insert(service.clone(), Vec::new());
                    self.data_context = Some(service);
                    self.read_offset = 0;
                    self.write_buf.clear();
                    self.push_ack(CommandId::AddDataService);
                }
            }
            CommandId::Read32BInDn => self.handle_data_read(),
            CommandId::Write32BInDn => self.handle_data_write(request),

            CommandId::StartMemoryMgmt => {
                self.mem_mgmt = true;
                self.push_ack(CommandId::StartMemoryMgmt);
            }
            CommandId::EndMemoryMgmt => {
                self.mem_mgmt = false;
                self.push_ack(CommandId::EndMemoryMgmt);
            }
            CommandId::GetCtrValue => {
                let ctr = self.ctr.clone();
                self.push_reply(CommandId::GetCtrValue, &ctr);
            }
            CommandId::GetCardCpzCtr => {
                for record in self.cpz_records.clone() {
                    self.push_reply(CommandId::CardCpzCtrPacket, &record);
                }
                self.push_reply(CommandId::GetCardCpzCtr, &[]);
            }
            CommandId::GetFavorite => {
                let slot = request.first_payload_byte() as usize;
                let fav = self
                    .favorites
                    .get(slot)
                    .copied()
                    .unwrap_or(FavoriteSlot::EMPTY);
                self.push_reply(CommandId::GetFavorite, &fav.to_payload());
            }
            CommandId::SetFavorite => {
                let payload = request.payload();
                if payload.len() >= 5 {
                    let slot = payload[0] as usize;
                    if slot < self.favorites.len() {
                        self.favorites[slot] = FavoriteSlot::from_payload(&payload[1..5]);
                    }
                }
                self.push_ack(CommandId::SetFavorite);
            }
            CommandId::GetStartingParent => {
                let bytes = self.start_cred.to_bytes();
                self.push_reply(CommandId::GetStartingParent, &bytes);
            }
            CommandId::GetDnStartParent => {
                let bytes = self.start_data.to_bytes();
                self.push_reply(CommandId::GetDnStartParent, &bytes);
            }
            CommandId::ReadFlashNode => self.handle_node_read(request),
            CommandId::CancelUserRequest => {
                // out-of-band, no reply
                debug!("cancel request observed");
            }

            other => {
                debug!(?other, "command not modelled, acknowledging");
                self.push_ack(other);
            }
        }
    }

    fn current_cred(&self) -> Option<&CredEntry> {
        self.context.as_ref().and_then(|c| self.creds.get(c))
    }

    fn current_cred_mut(&mut self) -> Option<&mut CredEntry> {
        let context = self.context.clone()?;
        self.creds.get_mut(&context)
    }

    fn handle_data_read(&mut self) {
        let Some(service) = self.data_context.clone() else {
            self.push_refusal(CommandId::Read32BInDn);
            return;
        };
        let Some(blob) = self.data.get(&service) else {
            self.push_refusal(CommandId::Read32BInDn);
            return;
        };
        // on the wire the blob carries its size up front
        let mut stream = (blob.len() as u32).to_be_bytes().to_vec();
        stream.extend_from_slice(blob);

        if self.read_offset >= stream.len() {
            self.push_reply(CommandId::Read32BInDn, &[0]);
            return;
        }
        let end = (self.read_offset + 32).min(stream.len());
        let chunk = stream[self.read_offset..end].to_vec();
        self.read_offset = end;
        self.push_reply(CommandId::Read32BInDn, &chunk);
    }

    fn handle_data_write(&mut self, request: Packet) {
        let payload = request.payload();
        if payload.is_empty() || self.data_context.is_none() {
            self.push_refusal(CommandId::Write32BInDn);
            return;
        }
        let eod = payload[0] != 0;
        self.write_buf.extend_from_slice(&payload[1..]);
        if eod {
            let buf = std::mem::take(&mut self.write_buf);
            if buf.len() >= 4 {
                let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                let data = buf[4..].get(..size).unwrap_or(&buf[4..]).to_vec();
                let service = self.data_context.clone().unwrap_or_default();
                debug!(service = %service, size, "data blob stored");
                self.data.insert(service, data);
            }
        }
        self.push_ack(CommandId::Write32BInDn);
    }

    fn handle_node_read(&mut self, request: Packet) {
        if !self.mem_mgmt || request.payload().len() < 2 {
            self.push_refusal(CommandId::ReadFlashNode);
            return;
        }
        let addr = match request.payload_addr(0) {
            Ok(a) => a,
            Err(_) => {
                self.push_refusal(CommandId::ReadFlashNode);
                return;
            }
        };
        let Some(image) = self.flash.get(&addr.as_u16()).copied() else {
            // empty slot: not allowed to read
            self.push_refusal(CommandId::ReadFlashNode);
            return;
        };
        // a node streams out as three packets
        self.push_reply(CommandId::ReadFlashNode, &image[..62]);
        self.push_reply(CommandId::ReadFlashNode, &image[62..124]);
        self.push_reply(CommandId::ReadFlashNode, &image[124..]);
    }
}

impl Transport for EmulDevice {
    fn send(&mut self, frame: Frame) -> TransportResult<()> {
        let packet = Packet::from_frame(frame);
        if packet.cmd_byte() == 0 {
            return Err(TransportError::WriteFailed {
                reason: "frame carries no command".to_string(),
            });
        }
        self.wire_log.push(packet);
        self.handle(packet);
        Ok(())
    }

    fn recv(&mut self) -> Option<Frame> {
        self.outbox.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(dev: &mut EmulDevice, cmd: CommandId, payload: &[u8]) -> Vec<Packet> {
        dev.send(Packet::new(cmd, payload).unwrap().into_frame())
            .unwrap();
        let mut replies = Vec::new();
        while let Some(frame) = dev.recv() {
            replies.push(Packet::from_frame(frame));
        }
        replies
    }

    #[test]
    fn test_version_reply() {
        let mut dev = EmulDevice::new(4, "v1.2_mini");
        let replies = send(&mut dev, CommandId::Version, &[]);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].payload()[0], 4);
        assert_eq!(&replies[0].payload()[1..], b"v1.2_mini");
    }

    #[test]
    fn test_context_select_and_login() {
        let mut dev = EmulDevice::new(4, "v1.2");
        dev.add_credential("gmail", "alice", "hunter2", "");

        let replies = send(&mut dev, CommandId::Context, b"nope\0");
        assert!(replies[0].is_refusal());

        let replies = send(&mut dev, CommandId::Context, b"gmail\0");
        assert!(replies[0].is_ack());

        let replies = send(&mut dev, CommandId::GetLogin, &[]);
        assert_eq!(replies[0].payload_string(), "alice");
    }

    #[test]
    fn test_node_read_three_packets() {
        let mut dev = EmulDevice::new(1, "v1.2");
        dev.install_cred_tree(&[("gmail", &["alice"])]);
        send(&mut dev, CommandId::StartMemoryMgmt, &[]);

        let addr = Address::from_page_and_slot(130, 0);
        let replies = send(&mut dev, CommandId::ReadFlashNode, &addr.to_bytes());
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0].len(), 62);
        assert_eq!(replies[1].len(), 62);
        assert_eq!(replies[2].len(), 8);

        // free slot reads refuse
        let empty = Address::from_page_and_slot(400, 0);
        let replies = send(&mut dev, CommandId::ReadFlashNode, &empty.to_bytes());
        assert_eq!(replies.len(), 1);
        assert!(replies[0].is_refusal());
    }

    #[test]
    fn test_node_read_outside_mmm_refused() {
        let mut dev = EmulDevice::new(1, "v1.2");
        dev.install_cred_tree(&[("gmail", &["alice"])]);
        let addr = Address::from_page_and_slot(130, 0);
        let replies = send(&mut dev, CommandId::ReadFlashNode, &addr.to_bytes());
        assert!(replies[0].is_refusal());
    }

    #[test]
    fn test_cpz_stream() {
        let mut dev = EmulDevice::new(1, "v1.2");
        dev.add_cpz_record(vec![1; 8]);
        dev.add_cpz_record(vec![2; 8]);
        let replies = send(&mut dev, CommandId::GetCardCpzCtr, &[]);
        assert_eq!(replies.len(), 3);
        assert_eq!(
            replies[0].cmd_byte(),
            CommandId::CardCpzCtrPacket.as_u8()
        );
        assert_eq!(replies[2].cmd_byte(), CommandId::GetCardCpzCtr.as_u8());
    }

    #[test]
    fn test_data_write_then_read() {
        let mut dev = EmulDevice::new(1, "v1.2");
        send(&mut dev, CommandId::AddDataService, b"notes\0");

        // stream "hello" with its 4-byte size prefix, one block, eod set
        let mut block = vec![1u8];
        block.extend_from_slice(&5u32.to_be_bytes());
        block.extend_from_slice(b"hello");
        block.resize(33, 0);
        let replies = send(&mut dev, CommandId::Write32BInDn, &block);
        assert!(replies[0].is_ack());
        assert_eq!(dev.data_blob("notes").unwrap(), b"hello");

        send(&mut dev, CommandId::SetDataService, b"notes\0");
        let replies = send(&mut dev, CommandId::Read32BInDn, &[]);
        assert_eq!(replies[0].len(), 9);
        let replies = send(&mut dev, CommandId::Read32BInDn, &[]);
        assert_eq!(replies[0].payload(), &[0]);
    }

    #[test]
    fn test_refusal_knob() {
        let mut dev = EmulDevice::new(1, "v1.2");
        dev.add_credential("gmail", "alice", "pw", "");
        send(&mut dev, CommandId::Context, b"gmail\0");
        dev.refuse(CommandId::GetPassword);
        let replies = send(&mut dev, CommandId::GetPassword, &[]);
        assert!(replies[0].is_refusal());
        dev.allow(CommandId::GetPassword);
        let replies = send(&mut dev, CommandId::GetPassword, &[]);
        assert_eq!(replies[0].payload_string(), "pw");
    }
}
