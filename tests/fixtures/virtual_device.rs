//! Simulated MTP device for integration testing
//!
//! `VirtualDevice` implements the transport and control-channel traits on top
//! of an in-memory object store, so a real [`Session`] can be driven end to
//! end without USB hardware:
//! - Parses command and data containers exactly as a device would
//! - Answers with data and response containers, split at the requested size
//! - Injects endpoint stalls and error responses on demand
//! - Can hang in the middle of a `GetObject` until the transaction is
//!   cancelled through the control channel
//!
//! # Example
//!
//! ```
//! use mtp_integration_tests::fixtures::VirtualDevice;
//!
//! let (mut session, device) = VirtualDevice::new().open_session();
//! let storages = session.get_storage_ids().unwrap();
//! assert_eq!(storages.len(), 1);
//! assert_eq!(device.operations().len(), 2);
//! ```
//!
//! [`Session`]: mtp_core::Session

use mtp_core::codec::{Reader, Writer};
use mtp_core::container::{Container, ContainerType, encode_container};
use mtp_core::{
    DataType, DeviceInfo, DevicePropertyCode, ObjectFormat, ObjectHandle, ObjectInfo,
    ObjectPropertyCode, OperationCode, ResponseCode, ScalarType, Session, SessionConfig, StorageId,
    StorageInfo, Value, property,
};
use mtp_transport::{
    CancelToken, ControlChannel, Direction, Transport, TransportError, TransportResult,
    TransportStats,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Storage id of the single simulated storage
pub const STORAGE: StorageId = StorageId(0x0001_0001);

/// Capacity of the simulated storage
const CAPACITY: u64 = 16 * 1024 * 1024 * 1024;

/// How often a hanging receive checks for cancellation
const POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
struct StoredObject {
    parent: u32,
    format: ObjectFormat,
    association_type: u16,
    name: String,
    data: Vec<u8>,
}

/// Command waiting for its data phase
#[derive(Debug)]
struct PendingWrite {
    op: u16,
    tx: u32,
    params: Vec<u32>,
    expected: Option<usize>,
    received: Vec<u8>,
}

/// A command as the device saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    /// Operation code
    pub op: OperationCode,
    /// Transaction id
    pub tx: u32,
    /// Parameters
    pub params: Vec<u32>,
}

#[derive(Debug)]
struct DeviceState {
    session_open: bool,
    objects: BTreeMap<u32, StoredObject>,
    next_handle: u32,
    announced: Option<u32>,
    friendly_name: String,
    battery: u8,

    pending_write: Option<PendingWrite>,
    outbound: VecDeque<Vec<u8>>,
    hanging: bool,

    failures: HashMap<u16, VecDeque<ResponseCode>>,
    hang_on_get: Option<u32>,
    stall_receives: usize,
    stall_sends: usize,

    commands: Vec<RecordedCommand>,
    receive_calls: usize,
    zero_length_packets: usize,
    halts_cleared: Vec<Direction>,
    abort_requests: Vec<u32>,
    stats: TransportStats,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            session_open: false,
            objects: BTreeMap::new(),
            next_handle: 1,
            announced: None,
            friendly_name: "Virtual Phone".to_string(),
            battery: 87,
            pending_write: None,
            outbound: VecDeque::new(),
            hanging: false,
            failures: HashMap::new(),
            hang_on_get: None,
            stall_receives: 0,
            stall_sends: 0,
            commands: Vec::new(),
            receive_calls: 0,
            zero_length_packets: 0,
            halts_cleared: Vec::new(),
            abort_requests: Vec::new(),
            stats: TransportStats::default(),
        }
    }
}

fn lock(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated MTP device speaking the container protocol
pub struct VirtualDevice {
    state: Arc<Mutex<DeviceState>>,
    max_packet_size: usize,
}

/// Test-side view of a [`VirtualDevice`] that outlives the boxed transport
#[derive(Clone)]
pub struct DeviceHandle {
    state: Arc<Mutex<DeviceState>>,
}

struct VirtualControl {
    state: Arc<Mutex<DeviceState>>,
}

impl VirtualDevice {
    /// Create an empty device with 512-byte packets
    #[must_use]
    pub fn new() -> Self {
        Self::with_packet_size(512)
    }

    /// Create an empty device with the given max packet size
    #[must_use]
    pub fn with_packet_size(max_packet_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::default())),
            max_packet_size,
        }
    }

    /// Handle for inspecting and scripting the device
    #[must_use]
    pub fn handle(&self) -> DeviceHandle {
        DeviceHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Box the device into a session and open it with the default config
    ///
    /// # Panics
    /// Panics if OpenSession fails
    #[must_use]
    pub fn open_session(self) -> (Session, DeviceHandle) {
        self.open_session_with(SessionConfig {
            close_on_drop: false,
            ..SessionConfig::default()
        })
    }

    /// Box the device into a session with `config` and open it
    ///
    /// # Panics
    /// Panics if OpenSession fails
    #[must_use]
    pub fn open_session_with(self, config: SessionConfig) -> (Session, DeviceHandle) {
        let handle = self.handle();
        let mut session = Session::new(Box::new(self), config);
        session.open(1).expect("OpenSession on the virtual device");
        (session, handle)
    }
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceHandle {
    /// Store a directory and return its handle
    pub fn add_directory(&self, parent: ObjectHandle, name: &str) -> ObjectHandle {
        self.add_object(parent, name, ObjectFormat::ASSOCIATION, Vec::new())
    }

    /// Store a file and return its handle
    pub fn add_file(&self, parent: ObjectHandle, name: &str, data: Vec<u8>) -> ObjectHandle {
        self.add_object(parent, name, ObjectFormat::from_filename(name), data)
    }

    fn add_object(
        &self,
        parent: ObjectHandle,
        name: &str,
        format: ObjectFormat,
        data: Vec<u8>,
    ) -> ObjectHandle {
        let mut state = lock(&self.state);
        let handle = state.next_handle;
        state.next_handle += 1;
        state.objects.insert(
            handle,
            StoredObject {
                parent: stored_parent(parent.0),
                format,
                association_type: u16::from(format.is_association()),
                name: name.to_string(),
                data,
            },
        );
        ObjectHandle(handle)
    }

    /// Contents of a stored object
    #[must_use]
    pub fn object_data(&self, handle: ObjectHandle) -> Option<Vec<u8>> {
        lock(&self.state)
            .objects
            .get(&handle.0)
            .map(|object| object.data.clone())
    }

    /// Whether an object exists
    #[must_use]
    pub fn contains(&self, handle: ObjectHandle) -> bool {
        lock(&self.state).objects.contains_key(&handle.0)
    }

    /// Answer the next `count` commands for `op` with `code`
    pub fn fail_operation(&self, op: OperationCode, code: ResponseCode, count: usize) {
        let mut state = lock(&self.state);
        let queue = state.failures.entry(op.0).or_default();
        queue.extend(std::iter::repeat_n(code, count));
    }

    /// Stall the bulk IN endpoint on the next `count` receives
    pub fn stall_receives(&self, count: usize) {
        lock(&self.state).stall_receives = count;
    }

    /// Stall the bulk OUT endpoint on the next `count` sends
    pub fn stall_sends(&self, count: usize) {
        lock(&self.state).stall_sends = count;
    }

    /// Hang after the first data chunk of `GetObject(handle)` until cancelled
    pub fn hang_on_get_object(&self, handle: ObjectHandle) {
        lock(&self.state).hang_on_get = Some(handle.0);
    }

    /// Commands received so far
    #[must_use]
    pub fn commands(&self) -> Vec<RecordedCommand> {
        lock(&self.state).commands.clone()
    }

    /// Operation codes received so far
    #[must_use]
    pub fn operations(&self) -> Vec<OperationCode> {
        lock(&self.state)
            .commands
            .iter()
            .map(|command| command.op)
            .collect()
    }

    /// Number of receive calls on the bulk IN endpoint
    #[must_use]
    pub fn receive_calls(&self) -> usize {
        lock(&self.state).receive_calls
    }

    /// Zero-length packets sent by the host
    #[must_use]
    pub fn zero_length_packets(&self) -> usize {
        lock(&self.state).zero_length_packets
    }

    /// Endpoints whose halt was cleared, in order
    #[must_use]
    pub fn halts_cleared(&self) -> Vec<Direction> {
        lock(&self.state).halts_cleared.clone()
    }

    /// Transaction ids passed to the cancel request
    #[must_use]
    pub fn abort_requests(&self) -> Vec<u32> {
        lock(&self.state).abort_requests.clone()
    }

    /// Whether the device considers a session open
    #[must_use]
    pub fn session_open(&self) -> bool {
        lock(&self.state).session_open
    }

    /// Current DeviceFriendlyName
    #[must_use]
    pub fn friendly_name(&self) -> String {
        lock(&self.state).friendly_name.clone()
    }
}

/// Objects at the storage root are stored with parent 0
fn stored_parent(parent: u32) -> u32 {
    if parent == ObjectHandle::ROOT.0 {
        0
    } else {
        parent
    }
}

fn expects_data_out(op: OperationCode) -> bool {
    matches!(
        op,
        OperationCode::SEND_OBJECT_INFO
            | OperationCode::SEND_OBJECT
            | OperationCode::SET_OBJECT_PROP_VALUE
            | OperationCode::SET_DEVICE_PROP_VALUE
    )
}

/// Result of executing one operation on the device
enum Reply {
    Ok { data: Option<Vec<u8>>, params: Vec<u32> },
    Error(ResponseCode),
}

impl Reply {
    fn ok() -> Self {
        Self::Ok {
            data: None,
            params: Vec::new(),
        }
    }

    fn data(data: Vec<u8>) -> Self {
        Self::Ok {
            data: Some(data),
            params: Vec::new(),
        }
    }

    fn params(params: Vec<u32>) -> Self {
        Self::Ok { data: None, params }
    }
}

impl DeviceState {
    fn accept_command(&mut self, container: &Container) {
        let op = OperationCode(container.code);
        let params = container.params().unwrap_or_default();
        self.commands.push(RecordedCommand {
            op,
            tx: container.transaction_id,
            params: params.clone(),
        });

        if expects_data_out(op) {
            self.pending_write = Some(PendingWrite {
                op: op.0,
                tx: container.transaction_id,
                params,
                expected: None,
                received: Vec::new(),
            });
        } else {
            self.complete(op, container.transaction_id, &params, &[]);
        }
    }

    fn accept_data(&mut self, buf: &[u8]) {
        let Some(pending) = self.pending_write.as_mut() else {
            return;
        };
        pending.received.extend_from_slice(buf);
        if pending.expected.is_none() && pending.received.len() >= 4 {
            let len = u32::from_le_bytes([
                pending.received[0],
                pending.received[1],
                pending.received[2],
                pending.received[3],
            ]);
            pending.expected = Some(len as usize);
        }
        let Some(expected) = pending.expected else {
            return;
        };
        if pending.received.len() < expected {
            return;
        }
        if let Some(pending) = self.pending_write.take() {
            let payload = pending
                .received
                .get(12..expected)
                .map(<[u8]>::to_vec)
                .unwrap_or_default();
            self.complete(OperationCode(pending.op), pending.tx, &pending.params, &payload);
        }
    }

    fn complete(&mut self, op: OperationCode, tx: u32, params: &[u32], payload: &[u8]) {
        let injected = self
            .failures
            .get_mut(&op.0)
            .and_then(VecDeque::pop_front);
        let hang = op == OperationCode::GET_OBJECT
            && self.hang_on_get.is_some()
            && params.first().copied() == self.hang_on_get;
        let reply = match injected {
            Some(code) => Reply::Error(code),
            None => self.execute(op, params, payload),
        };

        let (data, response_params) = match reply {
            Reply::Ok { data, params } => (data, params),
            Reply::Error(code) => {
                self.outbound.push_back(encode_container(
                    ContainerType::Response,
                    code.0,
                    tx,
                    &[],
                    None,
                ));
                return;
            }
        };
        if let Some(data) = data {
            let container = encode_container(ContainerType::Data, op.0, tx, &[], Some(&data));
            if hang {
                self.start_hang(&container);
                return;
            }
            self.outbound.push_back(container);
        }
        self.outbound.push_back(encode_container(
            ContainerType::Response,
            ResponseCode::OK.0,
            tx,
            &response_params,
            None,
        ));
    }

    fn start_hang(&mut self, container: &[u8]) {
        let first = container.len().min(4096);
        self.outbound.push_back(container[..first].to_vec());
        self.hanging = true;
        self.hang_on_get = None;
    }

    fn execute(&mut self, op: OperationCode, params: &[u32], payload: &[u8]) -> Reply {
        if !self.session_open && op != OperationCode::OPEN_SESSION {
            return Reply::Error(ResponseCode::SESSION_NOT_OPEN);
        }
        let param = |i: usize| params.get(i).copied().unwrap_or(0);

        match op {
            OperationCode::OPEN_SESSION => {
                if self.session_open {
                    return Reply::Error(ResponseCode::SESSION_ALREADY_OPEN);
                }
                self.session_open = true;
                Reply::ok()
            }
            OperationCode::CLOSE_SESSION => {
                self.session_open = false;
                Reply::ok()
            }
            OperationCode::GET_DEVICE_INFO => Reply::data(device_info()),
            OperationCode::GET_STORAGE_IDS => {
                let mut w = Writer::new();
                w.write_u32_array(&[STORAGE.0]);
                Reply::data(w.into_inner())
            }
            OperationCode::GET_STORAGE_INFO => {
                if param(0) != STORAGE.0 {
                    return Reply::Error(ResponseCode::INVALID_STORAGE_ID);
                }
                Reply::data(self.storage_info())
            }
            OperationCode::GET_OBJECT_HANDLES => self.object_handles(param(0), param(1), param(2)),
            OperationCode::GET_OBJECT_INFO => match self.objects.get(&param(0)) {
                Some(object) => Reply::data(object_info(object)),
                None => Reply::Error(ResponseCode::INVALID_OBJECT_HANDLE),
            },
            OperationCode::GET_OBJECT => match self.objects.get(&param(0)) {
                Some(object) if object.format.is_association() => {
                    Reply::Error(ResponseCode::INVALID_OBJECT_HANDLE)
                }
                Some(object) => Reply::data(object.data.clone()),
                None => Reply::Error(ResponseCode::INVALID_OBJECT_HANDLE),
            },
            OperationCode::DELETE_OBJECT => {
                if self.objects.contains_key(&param(0)) {
                    self.delete_tree(param(0));
                    Reply::ok()
                } else {
                    Reply::Error(ResponseCode::INVALID_OBJECT_HANDLE)
                }
            }
            OperationCode::SEND_OBJECT_INFO => self.send_object_info(param(0), param(1), payload),
            OperationCode::SEND_OBJECT => match self.announced.take() {
                Some(handle) => {
                    if let Some(object) = self.objects.get_mut(&handle) {
                        object.data = payload.to_vec();
                    }
                    Reply::ok()
                }
                None => Reply::Error(ResponseCode::NO_VALID_OBJECT_INFO),
            },
            OperationCode::GET_OBJECT_PROPS_SUPPORTED => {
                let mut w = Writer::new();
                w.write_u16_array(&SUPPORTED_OBJECT_PROPS.map(|(code, _)| code.0));
                Reply::data(w.into_inner())
            }
            OperationCode::GET_OBJECT_PROP_DESC => object_prop_desc(param(0)),
            OperationCode::GET_OBJECT_PROP_VALUE => self.object_prop_value(param(0), param(1)),
            OperationCode::SET_OBJECT_PROP_VALUE => {
                self.set_object_prop_value(param(0), param(1), payload)
            }
            OperationCode::GET_DEVICE_PROP_DESC => self.device_prop_desc(param(0)),
            OperationCode::GET_DEVICE_PROP_VALUE => self.device_prop_value(param(0)),
            OperationCode::SET_DEVICE_PROP_VALUE => self.set_device_prop_value(param(0), payload),
            _ => Reply::Error(ResponseCode::OPERATION_NOT_SUPPORTED),
        }
    }

    fn storage_info(&self) -> Vec<u8> {
        let used: u64 = self.objects.values().map(|o| o.data.len() as u64).sum();
        StorageInfo {
            storage_type: 3,
            filesystem_type: 2,
            access_capability: 0,
            max_capacity: CAPACITY,
            free_space: CAPACITY.saturating_sub(used),
            free_objects: 0xFFFF_FFFF,
            description: "Internal shared storage".to_string(),
            volume_label: String::new(),
        }
        .encode()
        .unwrap_or_default()
    }

    fn object_handles(&self, storage: u32, format: u32, parent: u32) -> Reply {
        if storage != StorageId::ALL.0 && storage != STORAGE.0 {
            return Reply::Error(ResponseCode::INVALID_STORAGE_ID);
        }
        let parent = stored_parent(parent);
        if parent != 0 && !self.objects.contains_key(&parent) {
            return Reply::Error(ResponseCode::INVALID_PARENT_OBJECT);
        }
        let handles: Vec<u32> = self
            .objects
            .iter()
            .filter(|(_, object)| object.parent == parent)
            .filter(|(_, object)| format == 0 || u32::from(object.format.0) == format)
            .map(|(handle, _)| *handle)
            .collect();
        let mut w = Writer::new();
        w.write_u32_array(&handles);
        Reply::data(w.into_inner())
    }

    fn delete_tree(&mut self, handle: u32) {
        let children: Vec<u32> = self
            .objects
            .iter()
            .filter(|(_, object)| object.parent == handle)
            .map(|(child, _)| *child)
            .collect();
        for child in children {
            self.delete_tree(child);
        }
        self.objects.remove(&handle);
    }

    fn send_object_info(&mut self, storage: u32, parent: u32, payload: &[u8]) -> Reply {
        let Ok(info) = ObjectInfo::decode(payload) else {
            return Reply::Error(ResponseCode::INVALID_PARAMETER);
        };
        let storage = if storage == StorageId::DEVICE_CHOOSES.0 {
            STORAGE.0
        } else {
            storage
        };
        if storage != STORAGE.0 {
            return Reply::Error(ResponseCode::INVALID_STORAGE_ID);
        }
        let stored = stored_parent(parent);
        if stored != 0 && !self.objects.get(&stored).is_some_and(|o| o.format.is_association()) {
            return Reply::Error(ResponseCode::INVALID_PARENT_OBJECT);
        }

        let handle = self.next_handle;
        self.next_handle += 1;
        self.objects.insert(
            handle,
            StoredObject {
                parent: stored,
                format: info.format,
                association_type: info.association_type,
                name: info.filename,
                data: Vec::new(),
            },
        );
        if !info.format.is_association() {
            self.announced = Some(handle);
        }
        Reply::params(vec![storage, parent, handle])
    }

    fn object_prop_value(&self, handle: u32, code: u32) -> Reply {
        let Some(object) = self.objects.get(&handle) else {
            return Reply::Error(ResponseCode::INVALID_OBJECT_HANDLE);
        };
        let value = match prop_code(code) {
            Some(ObjectPropertyCode::STORAGE_ID) => Value::UInt32(STORAGE.0),
            Some(ObjectPropertyCode::OBJECT_FORMAT) => Value::UInt16(object.format.0),
            Some(ObjectPropertyCode::OBJECT_SIZE) => Value::UInt64(object.data.len() as u64),
            Some(ObjectPropertyCode::OBJECT_FILENAME) => Value::String(object.name.clone()),
            Some(ObjectPropertyCode::PARENT_OBJECT) => Value::UInt32(object.parent),
            _ => return Reply::Error(ResponseCode::INVALID_OBJECT_PROP_CODE),
        };
        let datatype = prop_datatype(code).unwrap_or(DataType::String);
        match property::encode(datatype, &value) {
            Ok(bytes) => Reply::data(bytes),
            Err(_) => Reply::Error(ResponseCode::GENERAL_ERROR),
        }
    }

    fn set_object_prop_value(&mut self, handle: u32, code: u32, payload: &[u8]) -> Reply {
        let Some(object) = self.objects.get_mut(&handle) else {
            return Reply::Error(ResponseCode::INVALID_OBJECT_HANDLE);
        };
        if prop_code(code) != Some(ObjectPropertyCode::OBJECT_FILENAME) {
            return Reply::Error(ResponseCode::ACCESS_DENIED);
        }
        match Reader::new(payload).read_string() {
            Ok(name) if !name.is_empty() => {
                object.name = name;
                Reply::ok()
            }
            _ => Reply::Error(ResponseCode::INVALID_OBJECT_PROP_VALUE),
        }
    }

    fn device_prop_desc(&self, code: u32) -> Reply {
        let mut w = Writer::new();
        match device_prop_code(code) {
            Some(DevicePropertyCode::BATTERY_LEVEL) => {
                w.write_u16(DevicePropertyCode::BATTERY_LEVEL.0)
                    .write_u16(DataType::Scalar(ScalarType::UInt8).code())
                    .write_u8(0)
                    .write_u8(100)
                    .write_u8(self.battery)
                    .write_u8(1)
                    .write_u8(0)
                    .write_u8(100)
                    .write_u8(1);
            }
            Some(DevicePropertyCode::DEVICE_FRIENDLY_NAME) => {
                w.write_u16(DevicePropertyCode::DEVICE_FRIENDLY_NAME.0)
                    .write_u16(DataType::STRING_CODE)
                    .write_u8(1);
                if w.write_string("Virtual Phone").is_err()
                    || w.write_string(&self.friendly_name).is_err()
                {
                    return Reply::Error(ResponseCode::GENERAL_ERROR);
                }
                w.write_u8(0);
            }
            _ => return Reply::Error(ResponseCode::DEVICE_PROP_NOT_SUPPORTED),
        }
        Reply::data(w.into_inner())
    }

    fn device_prop_value(&self, code: u32) -> Reply {
        let mut w = Writer::new();
        match device_prop_code(code) {
            Some(DevicePropertyCode::BATTERY_LEVEL) => {
                w.write_u8(self.battery);
            }
            Some(DevicePropertyCode::DEVICE_FRIENDLY_NAME) => {
                if w.write_string(&self.friendly_name).is_err() {
                    return Reply::Error(ResponseCode::GENERAL_ERROR);
                }
            }
            _ => return Reply::Error(ResponseCode::DEVICE_PROP_NOT_SUPPORTED),
        }
        Reply::data(w.into_inner())
    }

    fn set_device_prop_value(&mut self, code: u32, payload: &[u8]) -> Reply {
        match device_prop_code(code) {
            Some(DevicePropertyCode::DEVICE_FRIENDLY_NAME) => {
                match Reader::new(payload).read_string() {
                    Ok(name) => {
                        self.friendly_name = name;
                        Reply::ok()
                    }
                    Err(_) => Reply::Error(ResponseCode::INVALID_DEVICE_PROP_VALUE),
                }
            }
            Some(_) => Reply::Error(ResponseCode::ACCESS_DENIED),
            None => Reply::Error(ResponseCode::DEVICE_PROP_NOT_SUPPORTED),
        }
    }
}

const SUPPORTED_OBJECT_PROPS: [(ObjectPropertyCode, DataType); 5] = [
    (
        ObjectPropertyCode::STORAGE_ID,
        DataType::Scalar(ScalarType::UInt32),
    ),
    (
        ObjectPropertyCode::OBJECT_FORMAT,
        DataType::Scalar(ScalarType::UInt16),
    ),
    (
        ObjectPropertyCode::OBJECT_SIZE,
        DataType::Scalar(ScalarType::UInt64),
    ),
    (ObjectPropertyCode::OBJECT_FILENAME, DataType::String),
    (
        ObjectPropertyCode::PARENT_OBJECT,
        DataType::Scalar(ScalarType::UInt32),
    ),
];

fn prop_code(code: u32) -> Option<ObjectPropertyCode> {
    let code = u16::try_from(code).ok()?;
    SUPPORTED_OBJECT_PROPS
        .iter()
        .map(|(c, _)| *c)
        .find(|c| c.0 == code)
}

fn prop_datatype(code: u32) -> Option<DataType> {
    SUPPORTED_OBJECT_PROPS
        .iter()
        .find(|(c, _)| u32::from(c.0) == code)
        .map(|(_, datatype)| *datatype)
}

fn device_prop_code(code: u32) -> Option<DevicePropertyCode> {
    [
        DevicePropertyCode::BATTERY_LEVEL,
        DevicePropertyCode::DEVICE_FRIENDLY_NAME,
    ]
    .into_iter()
    .find(|c| u32::from(c.0) == code)
}

fn object_prop_desc(code: u32) -> Reply {
    let (Some(code), Some(datatype)) = (prop_code(code), prop_datatype(code)) else {
        return Reply::Error(ResponseCode::INVALID_OBJECT_PROP_CODE);
    };
    let default = match datatype {
        DataType::String => Value::String(String::new()),
        DataType::Scalar(ScalarType::UInt16) => Value::UInt16(0),
        DataType::Scalar(ScalarType::UInt64) => Value::UInt64(0),
        _ => Value::UInt32(0),
    };
    let mut w = Writer::new();
    w.write_u16(code.0)
        .write_u16(datatype.code())
        .write_u8(u8::from(code == ObjectPropertyCode::OBJECT_FILENAME));
    if property::write_value(&mut w, datatype, &default).is_err() {
        return Reply::Error(ResponseCode::GENERAL_ERROR);
    }
    w.write_u32(0).write_u8(0);
    Reply::data(w.into_inner())
}

fn device_info() -> Vec<u8> {
    let operations = [
        OperationCode::GET_DEVICE_INFO,
        OperationCode::OPEN_SESSION,
        OperationCode::CLOSE_SESSION,
        OperationCode::GET_STORAGE_IDS,
        OperationCode::GET_STORAGE_INFO,
        OperationCode::GET_OBJECT_HANDLES,
        OperationCode::GET_OBJECT_INFO,
        OperationCode::GET_OBJECT,
        OperationCode::DELETE_OBJECT,
        OperationCode::SEND_OBJECT_INFO,
        OperationCode::SEND_OBJECT,
        OperationCode::GET_DEVICE_PROP_DESC,
        OperationCode::GET_DEVICE_PROP_VALUE,
        OperationCode::SET_DEVICE_PROP_VALUE,
        OperationCode::GET_OBJECT_PROPS_SUPPORTED,
        OperationCode::GET_OBJECT_PROP_DESC,
        OperationCode::GET_OBJECT_PROP_VALUE,
        OperationCode::SET_OBJECT_PROP_VALUE,
    ];
    DeviceInfo {
        standard_version: 100,
        vendor_extension_id: 6,
        vendor_extension_version: 100,
        vendor_extension_desc: "microsoft.com: 1.0;".to_string(),
        functional_mode: 0,
        operations_supported: operations.iter().map(|op| op.0).collect(),
        events_supported: vec![0x4002, 0x4003],
        device_properties_supported: vec![
            DevicePropertyCode::BATTERY_LEVEL.0,
            DevicePropertyCode::DEVICE_FRIENDLY_NAME.0,
        ],
        capture_formats: Vec::new(),
        playback_formats: vec![ObjectFormat::UNDEFINED.0, ObjectFormat::ASSOCIATION.0],
        manufacturer: "Acme".to_string(),
        model: "Virtual".to_string(),
        device_version: "1.0".to_string(),
        serial_number: "0123456789ABCDEF".to_string(),
    }
    .encode()
    .unwrap_or_default()
}

fn object_info(object: &StoredObject) -> Vec<u8> {
    let mut info = ObjectInfo {
        storage_id: STORAGE,
        format: object.format,
        association_type: object.association_type,
        parent: ObjectHandle(object.parent),
        filename: object.name.clone(),
        modification_date: "20240101T120000".to_string(),
        ..ObjectInfo::default()
    };
    info.set_size(object.data.len() as u64);
    info.encode().unwrap_or_default()
}

impl Transport for VirtualDevice {
    fn send(&mut self, buf: &[u8], _timeout: Duration, cancel: &CancelToken) -> TransportResult<()> {
        let mut state = lock(&self.state);
        if cancel.is_cancelled() {
            state.stats.record_error(Direction::Out, &TransportError::Aborted);
            return Err(TransportError::Aborted);
        }
        if state.stall_sends > 0 {
            state.stall_sends -= 1;
            let err = TransportError::Stall(Direction::Out);
            state.stats.record_error(Direction::Out, &err);
            return Err(err);
        }
        state.stats.record_transfer(Direction::Out, buf.len());

        if buf.is_empty() {
            state.zero_length_packets += 1;
            return Ok(());
        }
        if state.pending_write.is_some() {
            state.accept_data(buf);
            return Ok(());
        }
        match Container::decode(buf) {
            Ok(container) if container.kind == ContainerType::Command => {
                state.accept_command(&container);
                Ok(())
            }
            Ok(container) => Err(TransportError::Other(format!(
                "unexpected {} container from host",
                container.kind
            ))),
            Err(err) => Err(TransportError::Other(format!("bad container: {err}"))),
        }
    }

    fn receive(
        &mut self,
        max_len: usize,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> TransportResult<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        lock(&self.state).receive_calls += 1;
        loop {
            {
                let mut state = lock(&self.state);
                if state.stall_receives > 0 {
                    state.stall_receives -= 1;
                    let err = TransportError::Stall(Direction::In);
                    state.stats.record_error(Direction::In, &err);
                    return Err(err);
                }
                if let Some(mut buf) = state.outbound.pop_front() {
                    if buf.len() > max_len {
                        let rest = buf.split_off(max_len);
                        state.outbound.push_front(rest);
                    }
                    state.stats.record_transfer(Direction::In, buf.len());
                    return Ok(buf);
                }
                if cancel.is_cancelled() {
                    state.stats.record_error(Direction::In, &TransportError::Aborted);
                    return Err(TransportError::Aborted);
                }
                if !state.hanging {
                    return Err(TransportError::Timeout);
                }
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            thread::sleep(POLL);
        }
    }

    fn clear_halt(&mut self, direction: Direction) -> TransportResult<()> {
        lock(&self.state).halts_cleared.push(direction);
        Ok(())
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn control(&self) -> Arc<dyn ControlChannel> {
        Arc::new(VirtualControl {
            state: Arc::clone(&self.state),
        })
    }

    fn stats(&self) -> TransportStats {
        lock(&self.state).stats.clone()
    }
}

impl ControlChannel for VirtualControl {
    fn request_abort(&self, transaction_id: u32, _timeout: Duration) -> TransportResult<()> {
        let mut state = lock(&self.state);
        tracing::debug!(transaction_id, "Virtual device cancelling transaction");
        state.abort_requests.push(transaction_id);
        state.outbound.clear();
        state.pending_write = None;
        state.hanging = false;
        Ok(())
    }
}
