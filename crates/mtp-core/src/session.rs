//! MTP session: the public operation set.
//!
//! A `Session` owns the transaction engine and tracks whether an MTP session
//! is open on the device. Every operation other than [`Session::open`]
//! requires the session to be open.

use crate::codec::Reader;
use crate::codes::{
    DevicePropertyCode, ObjectFormat, ObjectPropertyCode, OperationCode, ResponseCode,
};
use crate::dataset::{DeviceInfo, NewObject, ObjectInfo, StorageInfo};
use crate::error::{Error, ProtocolError, Result};
use crate::property::{self, DataType, DevicePropertyDesc, ObjectPropertyDesc, Value};
use crate::transaction::{
    AbortHandle, DataPhase, EngineConfig, Progress, TransactionEngine, TransactionIds,
};
use crate::types::{ObjectHandle, StorageId};
use mtp_transport::{Transport, TransportStats};
use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Transaction engine settings
    pub engine: EngineConfig,
    /// Timeout for the control request sent by an abort
    pub abort_timeout: Duration,
    /// Close the device session when the `Session` is dropped
    pub close_on_drop: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            abort_timeout: Duration::from_secs(1),
            close_on_drop: true,
        }
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device session
    Closed,
    /// OpenSession succeeded
    Open,
}

impl SessionState {
    /// State name for error messages
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host side of one MTP session.
///
/// `Session` is `Send` but not `Sync`: one thread drives it, and other
/// threads may only cancel the transaction in flight through an
/// [`AbortHandle`].
pub struct Session {
    engine: TransactionEngine,
    state: SessionState,
    session_id: u32,
    config: SessionConfig,
}

impl Session {
    /// Create a closed session over `transport`
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, config: SessionConfig) -> Self {
        let engine = TransactionEngine::new(transport, config.engine.clone());
        Self {
            engine,
            state: SessionState::Closed,
            session_id: 0,
            config,
        }
    }

    /// Start transaction ids at `ids` instead of 1
    #[must_use]
    pub fn with_transaction_ids(mut self, ids: TransactionIds) -> Self {
        self.engine.set_transaction_ids(ids);
        self
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id passed to OpenSession, 0 while closed
    #[must_use]
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Handle that cancels the transaction in flight from another thread
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.engine.abort_handle()
    }

    /// Abort timeout from the session configuration
    #[must_use]
    pub fn abort_timeout(&self) -> Duration {
        self.config.abort_timeout
    }

    /// Transport statistics
    #[must_use]
    pub fn transport_stats(&self) -> TransportStats {
        self.engine.transport_stats()
    }

    fn require(&self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::SessionState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    fn command(&mut self, op: OperationCode, params: &[u32]) -> Result<Vec<u32>> {
        self.require(SessionState::Open)?;
        Ok(self.engine.execute_command(op, params)?.params)
    }

    fn read(&mut self, op: OperationCode, params: &[u32]) -> Result<Vec<u8>> {
        self.require(SessionState::Open)?;
        Ok(self.engine.execute_read(op, params)?.1)
    }

    fn write(&mut self, op: OperationCode, params: &[u32], payload: &[u8]) -> Result<Vec<u32>> {
        self.require(SessionState::Open)?;
        Ok(self.engine.execute_write(op, params, payload)?.params)
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Open an MTP session with the given id.
    ///
    /// A `SessionAlreadyOpen` response is accepted; the device keeps the
    /// session it already has.
    ///
    /// # Errors
    /// Returns `SessionState` if already open, or the transaction error
    pub fn open(&mut self, session_id: u32) -> Result<()> {
        self.require(SessionState::Closed)?;
        match self
            .engine
            .execute_command(OperationCode::OPEN_SESSION, &[session_id])
        {
            Ok(_) => {}
            Err(Error::Device(ResponseCode::SESSION_ALREADY_OPEN)) => {
                tracing::warn!(session_id, "Device reports session already open");
            }
            Err(e) => return Err(e),
        }
        self.state = SessionState::Open;
        self.session_id = session_id;
        tracing::info!(session_id, "Session opened");
        Ok(())
    }

    /// Close the MTP session.
    ///
    /// The session is considered closed even if CloseSession fails.
    ///
    /// # Errors
    /// Returns `SessionState` if not open, or the transaction error
    pub fn close(&mut self) -> Result<()> {
        self.require(SessionState::Open)?;
        let result = self
            .engine
            .execute_command(OperationCode::CLOSE_SESSION, &[]);
        self.state = SessionState::Closed;
        tracing::info!(session_id = self.session_id, "Session closed");
        self.session_id = 0;
        result.map(|_| ())
    }

    // ========================================================================
    // Device and storage
    // ========================================================================

    /// GetDeviceInfo
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the dataset is malformed
    pub fn get_device_info(&mut self) -> Result<DeviceInfo> {
        let data = self.read(OperationCode::GET_DEVICE_INFO, &[])?;
        Ok(DeviceInfo::decode(&data)?)
    }

    /// GetStorageIDs
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the array is malformed
    pub fn get_storage_ids(&mut self) -> Result<Vec<StorageId>> {
        let data = self.read(OperationCode::GET_STORAGE_IDS, &[])?;
        let ids = Reader::new(&data).read_u32_array()?;
        Ok(ids.into_iter().map(StorageId).collect())
    }

    /// GetStorageInfo
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the dataset is malformed
    pub fn get_storage_info(&mut self, storage: StorageId) -> Result<StorageInfo> {
        let data = self.read(OperationCode::GET_STORAGE_INFO, &[storage.0])?;
        Ok(StorageInfo::decode(&data)?)
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// GetObjectHandles for the children of `parent`.
    ///
    /// Use [`StorageId::ALL`], [`ObjectFormat::ANY`] and
    /// [`ObjectHandle::ROOT`] to widen the filters.
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the array is malformed
    pub fn get_object_handles(
        &mut self,
        storage: StorageId,
        format: ObjectFormat,
        parent: ObjectHandle,
    ) -> Result<Vec<ObjectHandle>> {
        let data = self.read(
            OperationCode::GET_OBJECT_HANDLES,
            &[storage.0, u32::from(format.0), parent.0],
        )?;
        let handles = Reader::new(&data).read_u32_array()?;
        Ok(handles.into_iter().map(ObjectHandle).collect())
    }

    /// GetObjectInfo
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the dataset is malformed
    pub fn get_object_info(&mut self, handle: ObjectHandle) -> Result<ObjectInfo> {
        let data = self.read(OperationCode::GET_OBJECT_INFO, &[handle.0])?;
        Ok(ObjectInfo::decode(&data)?)
    }

    /// Stream the object's data into `writer`, returning the byte count
    ///
    /// # Errors
    /// Returns an error if the transaction fails or `writer` fails
    pub fn get_object(
        &mut self,
        handle: ObjectHandle,
        writer: &mut dyn Write,
        progress: Progress<'_>,
    ) -> Result<u64> {
        self.require(SessionState::Open)?;
        let mut counter = CountingWriter { inner: writer, written: 0 };
        self.engine.execute(
            OperationCode::GET_OBJECT,
            &[handle.0],
            DataPhase::Receive(&mut counter),
            progress,
        )?;
        Ok(counter.written)
    }

    /// DeleteObject; the device deletes directory contents itself
    ///
    /// # Errors
    /// Returns an error if the transaction fails
    pub fn delete_object(&mut self, handle: ObjectHandle) -> Result<()> {
        self.command(OperationCode::DELETE_OBJECT, &[handle.0, 0])?;
        Ok(())
    }

    /// SendObjectInfo: announce a new object under `parent`
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the response lacks the
    /// new object's identity
    pub fn send_object_info(
        &mut self,
        info: &ObjectInfo,
        storage: StorageId,
        parent: ObjectHandle,
    ) -> Result<NewObject> {
        let dataset = info.encode()?;
        let params = self.write(
            OperationCode::SEND_OBJECT_INFO,
            &[storage.0, parent.0],
            &dataset,
        )?;
        let created = NewObject::from_params(&params)?;
        tracing::debug!(
            handle = %created.handle,
            parent = %created.parent,
            name = %info.filename,
            "Object announced"
        );
        Ok(created)
    }

    /// SendObject: stream `size` bytes for the object announced last
    ///
    /// # Errors
    /// Returns an error if the transaction fails or `reader` fails
    pub fn send_object(
        &mut self,
        reader: &mut dyn Read,
        size: u64,
        progress: Progress<'_>,
    ) -> Result<()> {
        self.require(SessionState::Open)?;
        self.engine.execute(
            OperationCode::SEND_OBJECT,
            &[],
            DataPhase::Send(reader, size),
            progress,
        )?;
        Ok(())
    }

    /// Upload a file: SendObjectInfo followed by SendObject
    ///
    /// # Errors
    /// Returns an error if either transaction fails
    pub fn upload(
        &mut self,
        storage: StorageId,
        parent: ObjectHandle,
        name: &str,
        reader: &mut dyn Read,
        size: u64,
        progress: Progress<'_>,
    ) -> Result<NewObject> {
        let info = ObjectInfo::for_file(name, size);
        let created = self.send_object_info(&info, storage, parent)?;
        self.send_object(reader, size, progress)?;
        Ok(created)
    }

    /// Create a directory (association object) under `parent`
    ///
    /// # Errors
    /// Returns an error if the transaction fails
    pub fn create_directory(
        &mut self,
        storage: StorageId,
        parent: ObjectHandle,
        name: &str,
    ) -> Result<NewObject> {
        let info = ObjectInfo::for_directory(name);
        self.send_object_info(&info, storage, parent)
    }

    // ========================================================================
    // Object properties
    // ========================================================================

    /// GetObjectPropsSupported for a format
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the array is malformed
    pub fn get_object_props_supported(
        &mut self,
        format: ObjectFormat,
    ) -> Result<Vec<ObjectPropertyCode>> {
        let data = self.read(
            OperationCode::GET_OBJECT_PROPS_SUPPORTED,
            &[u32::from(format.0)],
        )?;
        let codes = Reader::new(&data).read_u16_array()?;
        Ok(codes.into_iter().map(ObjectPropertyCode).collect())
    }

    /// Properties supported for an object, looked up through its format
    ///
    /// # Errors
    /// Returns an error if either transaction fails
    pub fn get_object_props_supported_for(
        &mut self,
        handle: ObjectHandle,
    ) -> Result<Vec<ObjectPropertyCode>> {
        let format = self.get_object_integer_property(handle, ObjectPropertyCode::OBJECT_FORMAT)?;
        let format =
            u16::try_from(format).map_err(|_| ProtocolError::DatatypeMismatch("uint16"))?;
        self.get_object_props_supported(ObjectFormat(format))
    }

    /// GetObjectPropDesc
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the dataset is malformed
    pub fn get_object_property_desc(
        &mut self,
        code: ObjectPropertyCode,
        format: ObjectFormat,
    ) -> Result<ObjectPropertyDesc> {
        let data = self.read(
            OperationCode::GET_OBJECT_PROP_DESC,
            &[u32::from(code.0), u32::from(format.0)],
        )?;
        Ok(ObjectPropertyDesc::decode(&data)?)
    }

    /// GetObjectPropValue, undecoded
    ///
    /// # Errors
    /// Returns an error if the transaction fails
    pub fn get_object_property(
        &mut self,
        handle: ObjectHandle,
        code: ObjectPropertyCode,
    ) -> Result<Vec<u8>> {
        self.read(
            OperationCode::GET_OBJECT_PROP_VALUE,
            &[handle.0, u32::from(code.0)],
        )
    }

    /// String object property (e.g. file name)
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the string is malformed
    pub fn get_object_string_property(
        &mut self,
        handle: ObjectHandle,
        code: ObjectPropertyCode,
    ) -> Result<String> {
        let data = self.get_object_property(handle, code)?;
        Ok(Reader::new(&data).read_string()?)
    }

    /// Unsigned integer object property, width implied by its length
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the width is unsupported
    pub fn get_object_integer_property(
        &mut self,
        handle: ObjectHandle,
        code: ObjectPropertyCode,
    ) -> Result<u64> {
        let data = self.get_object_property(handle, code)?;
        Ok(property::decode_unsigned(&data)?)
    }

    /// Object property decoded as the declared datatype
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the value is malformed
    pub fn get_object_property_value(
        &mut self,
        handle: ObjectHandle,
        code: ObjectPropertyCode,
        datatype: DataType,
    ) -> Result<Value> {
        let data = self.get_object_property(handle, code)?;
        Ok(property::decode(datatype, &data)?)
    }

    /// SetObjectPropValue
    ///
    /// # Errors
    /// Returns `DatatypeMismatch` if `value` is not a `datatype`, or the
    /// transaction error
    pub fn set_object_property(
        &mut self,
        handle: ObjectHandle,
        code: ObjectPropertyCode,
        datatype: DataType,
        value: &Value,
    ) -> Result<()> {
        let payload = property::encode(datatype, value)?;
        self.write(
            OperationCode::SET_OBJECT_PROP_VALUE,
            &[handle.0, u32::from(code.0)],
            &payload,
        )?;
        Ok(())
    }

    // ========================================================================
    // Device properties
    // ========================================================================

    /// GetDevicePropDesc
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the dataset is malformed
    pub fn get_device_property_desc(
        &mut self,
        code: DevicePropertyCode,
    ) -> Result<DevicePropertyDesc> {
        let data = self.read(OperationCode::GET_DEVICE_PROP_DESC, &[u32::from(code.0)])?;
        Ok(DevicePropertyDesc::decode(&data)?)
    }

    /// GetDevicePropValue, undecoded
    ///
    /// # Errors
    /// Returns an error if the transaction fails
    pub fn get_device_property(&mut self, code: DevicePropertyCode) -> Result<Vec<u8>> {
        self.read(OperationCode::GET_DEVICE_PROP_VALUE, &[u32::from(code.0)])
    }

    /// Device property decoded as the declared datatype
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the value is malformed
    pub fn get_device_property_value(
        &mut self,
        code: DevicePropertyCode,
        datatype: DataType,
    ) -> Result<Value> {
        let data = self.get_device_property(code)?;
        Ok(property::decode(datatype, &data)?)
    }

    /// SetDevicePropValue
    ///
    /// # Errors
    /// Returns `DatatypeMismatch` if `value` is not a `datatype`, or the
    /// transaction error
    pub fn set_device_property(
        &mut self,
        code: DevicePropertyCode,
        datatype: DataType,
        value: &Value,
    ) -> Result<()> {
        let payload = property::encode(datatype, value)?;
        self.write(
            OperationCode::SET_DEVICE_PROP_VALUE,
            &[u32::from(code.0)],
            &payload,
        )?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Open && self.config.close_on_drop {
            if let Err(e) = self.close() {
                tracing::warn!("Failed to close session on drop: {}", e);
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .field("next_transaction_id", &self.engine.next_transaction_id())
            .finish_non_exhaustive()
    }
}

struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    written: u64,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
