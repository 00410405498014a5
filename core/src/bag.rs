//! Sensor-log container access.
//!
//! The rewriter reads and writes logs through two small traits: [`MessageSource`] iterates the
//! messages of a set of topics in timestamp order, and [`MessageSink`] appends messages to a
//! topic. Two implementations are provided:
//!
//! - [`BagReader`] / [`BagWriter`]: ROS1 bag format v2.0 with uncompressed chunks, which is
//!   what `rosbag play` (and therefore the SLAM launch files) consume.
//! - [`MemoryLog`]: an in-memory log used to exercise the pipeline without touching disk.
//!
//! ## Bag layout
//!
//! A bag is the magic line `#ROSBAG V2.0\n` followed by records. Every record is a
//! length-prefixed header (a list of length-prefixed `name=value` fields, one of which is
//! `op`) followed by length-prefixed data. The writer produces
//!
//! ```text
//! magic | file header (fixed 4096 bytes) | (chunk | index*)* | connection* | chunk info*
//! ```
//!
//! and seeks back to fill in the file header once the index position is known. The reader
//! walks the records sequentially and only needs chunk and connection records, so it also
//! accepts bags that were not written by [`BagWriter`] as long as their chunks are
//! uncompressed.
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SpoofError};
use crate::pointcloud::{IMU_MD5, IMU_TYPE, POINTCLOUD2_MD5, POINTCLOUD2_TYPE};
use crate::wire::{self, Cursor};

/// First bytes of every ROS1 bag v2.0 file.
pub const MAGIC: &[u8] = b"#ROSBAG V2.0\n";
/// Size reserved for the file header record so it can be rewritten in place.
const FILE_HEADER_LENGTH: usize = 4096;
/// Uncompressed chunk size after which the writer starts a new chunk.
pub const CHUNK_THRESHOLD: usize = 768 * 1024;

const OP_MSG_DATA: u8 = 0x02;
const OP_FILE_HEADER: u8 = 0x03;
const OP_INDEX_DATA: u8 = 0x04;
const OP_CHUNK: u8 = 0x05;
const OP_CHUNK_INFO: u8 = 0x06;
const OP_CONNECTION: u8 = 0x07;

/// ROS message type of a connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageType {
    /// Fully qualified type name, e.g. `sensor_msgs/PointCloud2`.
    pub name: String,
    pub md5sum: String,
    /// Full message definition text. May be empty for logs that never leave memory.
    pub definition: String,
}

impl MessageType {
    pub fn new(name: &str, md5sum: &str, definition: &str) -> Self {
        MessageType {
            name: name.to_string(),
            md5sum: md5sum.to_string(),
            definition: definition.to_string(),
        }
    }

    /// `sensor_msgs/PointCloud2` without a definition text.
    pub fn point_cloud2() -> Self {
        MessageType::new(POINTCLOUD2_TYPE, POINTCLOUD2_MD5, "")
    }

    /// `sensor_msgs/Imu` without a definition text.
    pub fn imu() -> Self {
        MessageType::new(IMU_TYPE, IMU_MD5, "")
    }
}

/// Handle returned by [`MessageSink::add_connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u32);

/// A topic together with its message type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub topic: String,
    pub msg_type: MessageType,
}

/// One serialized message as stored in the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    /// Log (arrival) time in nanoseconds.
    pub timestamp_ns: u64,
    /// ROS1-serialized message body.
    pub data: Vec<u8>,
}

/// Read access to a recorded log.
pub trait MessageSource {
    /// Every connection in the log.
    fn connections(&self) -> Vec<Connection>;

    /// Messages on `topics` (all topics when empty) in log-time order.
    fn messages<'a>(
        &'a self,
        topics: &[&str],
    ) -> Box<dyn Iterator<Item = Result<RawMessage>> + 'a>;

    /// First connection on `topic`, if any.
    fn connection_for(&self, topic: &str) -> Option<Connection> {
        self.connections().into_iter().find(|c| c.topic == topic)
    }
}

/// Write access to a log being produced.
pub trait MessageSink {
    /// Register a topic; messages are written against the returned handle.
    fn add_connection(&mut self, topic: &str, msg_type: &MessageType) -> Result<ConnectionId>;

    /// Append a serialized message at `timestamp_ns`.
    fn write(&mut self, connection: ConnectionId, timestamp_ns: u64, data: &[u8]) -> Result<()>;

    /// Flush everything and finalize the container. Further writes are an error.
    fn finish(&mut self) -> Result<()>;
}

// --- record header fields ---

/// Parsed `name=value` fields of a record header.
struct RecordHeader<'a> {
    fields: Vec<(&'a str, &'a [u8])>,
}

impl<'a> RecordHeader<'a> {
    fn parse(raw: &'a [u8]) -> Result<Self> {
        let mut cur = Cursor::new(raw);
        let mut fields = Vec::new();
        while !cur.is_empty() {
            let field = cur.read_bytes()?;
            let eq = field
                .iter()
                .position(|b| *b == b'=')
                .ok_or_else(|| SpoofError::Format("record header field without '='".into()))?;
            let name = std::str::from_utf8(&field[..eq])
                .map_err(|e| SpoofError::Format(format!("invalid header field name: {e}")))?;
            fields.push((name, &field[eq + 1..]));
        }
        Ok(RecordHeader { fields })
    }

    fn get(&self, name: &str) -> Result<&'a [u8]> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| SpoofError::Format(format!("record header is missing '{name}'")))
    }

    fn op(&self) -> Result<u8> {
        Cursor::new(self.get("op")?).read_u8()
    }

    fn u32(&self, name: &str) -> Result<u32> {
        Cursor::new(self.get(name)?).read_u32()
    }

    fn time(&self, name: &str) -> Result<u64> {
        Cursor::new(self.get(name)?).read_time()
    }

    fn string(&self, name: &str) -> Result<String> {
        String::from_utf8(self.get(name)?.to_vec())
            .map_err(|e| SpoofError::Format(format!("header field '{name}' is not UTF-8: {e}")))
    }
}

fn encode_header(fields: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in fields {
        wire::write_u32(&mut out, (name.len() + 1 + value.len()) as u32);
        out.extend_from_slice(name.as_bytes());
        out.push(b'=');
        out.extend_from_slice(value);
    }
    out
}

fn encode_record(out: &mut Vec<u8>, fields: &[(&str, Vec<u8>)], data: &[u8]) {
    wire::write_bytes(out, &encode_header(fields));
    wire::write_bytes(out, data);
}

fn time_bytes(stamp_ns: u64) -> Vec<u8> {
    let mut v = Vec::with_capacity(8);
    wire::write_time(&mut v, stamp_ns);
    v
}

fn connection_data(connection: &Connection) -> Vec<u8> {
    let ty = &connection.msg_type;
    encode_header(&[
        ("topic", connection.topic.as_bytes().to_vec()),
        ("type", ty.name.as_bytes().to_vec()),
        ("md5sum", ty.md5sum.as_bytes().to_vec()),
        ("message_definition", ty.definition.as_bytes().to_vec()),
    ])
}

fn connection_record(out: &mut Vec<u8>, connection: &Connection) {
    encode_record(
        out,
        &[
            ("op", vec![OP_CONNECTION]),
            ("conn", connection.id.0.to_le_bytes().to_vec()),
            ("topic", connection.topic.as_bytes().to_vec()),
        ],
        &connection_data(connection),
    );
}

fn file_header_record(index_pos: u64, conn_count: u32, chunk_count: u32) -> Vec<u8> {
    let header = encode_header(&[
        ("op", vec![OP_FILE_HEADER]),
        ("index_pos", index_pos.to_le_bytes().to_vec()),
        ("conn_count", conn_count.to_le_bytes().to_vec()),
        ("chunk_count", chunk_count.to_le_bytes().to_vec()),
    ]);
    let padding = vec![b' '; FILE_HEADER_LENGTH - header.len()];
    let mut out = Vec::with_capacity(FILE_HEADER_LENGTH + 8);
    wire::write_bytes(&mut out, &header);
    wire::write_bytes(&mut out, &padding);
    out
}

// --- reader ---

struct Record<'a> {
    header: RecordHeader<'a>,
    data: &'a [u8],
    /// Absolute offset of `data` in the file buffer.
    data_offset: usize,
}

fn read_record<'a>(cur: &mut Cursor<'a>, base: usize) -> Result<Record<'a>> {
    let header = RecordHeader::parse(cur.read_bytes()?)?;
    let data_len = cur.read_u32()? as usize;
    let data_offset = base + cur.position();
    let data = cur.take(data_len)?;
    Ok(Record {
        header,
        data,
        data_offset,
    })
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    conn: u32,
    timestamp_ns: u64,
    start: usize,
    end: usize,
}

/// ROS1 bag v2.0 reader.
///
/// The whole file is loaded on open and indexed by walking its records; messages are served
/// from the in-memory buffer in log-time order.
pub struct BagReader {
    path: PathBuf,
    buf: Vec<u8>,
    connections: BTreeMap<u32, Connection>,
    entries: Vec<Entry>,
}

impl BagReader {
    /// Open and index a bag file.
    ///
    /// # Errors
    /// * `SpoofError::Io` if the file cannot be read.
    /// * `SpoofError::Format` if the file is not an uncompressed ROS1 bag v2.0.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let buf = std::fs::read(path).map_err(|e| SpoofError::io(path, e))?;
        let mut reader = BagReader::from_bytes(buf)?;
        reader.path = path.to_path_buf();
        log::debug!(
            "Opened {} ({} connections, {} messages)",
            path.display(),
            reader.connections.len(),
            reader.entries.len()
        );
        Ok(reader)
    }

    /// Index a bag held in memory.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        let (connections, entries) = index_records(&buf)?;
        Ok(BagReader {
            path: PathBuf::from("<memory>"),
            buf,
            connections,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn message_count(&self) -> usize {
        self.entries.len()
    }

    /// Log time of the earliest message.
    pub fn start_time_ns(&self) -> Option<u64> {
        self.entries.first().map(|e| e.timestamp_ns)
    }

    /// Log time of the latest message.
    pub fn end_time_ns(&self) -> Option<u64> {
        self.entries.last().map(|e| e.timestamp_ns)
    }
}

fn index_records(buf: &[u8]) -> Result<(BTreeMap<u32, Connection>, Vec<Entry>)> {
    if !buf.starts_with(MAGIC) {
        return Err(SpoofError::Format("not a ROS1 bag v2.0 file".into()));
    }
    let mut connections = BTreeMap::new();
    let mut entries = Vec::new();
    let mut cur = Cursor::new(&buf[MAGIC.len()..]);
    while !cur.is_empty() {
        let record = read_record(&mut cur, MAGIC.len())?;
        match record.header.op()? {
            OP_CHUNK => {
                let compression = record.header.string("compression")?;
                if compression != "none" {
                    return Err(SpoofError::Format(format!(
                        "chunk compression '{compression}' is not supported"
                    )));
                }
                let mut inner = Cursor::new(record.data);
                while !inner.is_empty() {
                    let rec = read_record(&mut inner, record.data_offset)?;
                    visit(rec, &mut connections, &mut entries)?;
                }
            }
            OP_CONNECTION | OP_MSG_DATA => visit(record, &mut connections, &mut entries)?,
            OP_FILE_HEADER | OP_INDEX_DATA | OP_CHUNK_INFO => {}
            op => {
                return Err(SpoofError::Format(format!("unknown record op 0x{op:02x}")));
            }
        }
    }
    // stable: equal stamps keep file order
    entries.sort_by_key(|e| e.timestamp_ns);
    Ok((connections, entries))
}

fn visit(
    record: Record<'_>,
    connections: &mut BTreeMap<u32, Connection>,
    entries: &mut Vec<Entry>,
) -> Result<()> {
    match record.header.op()? {
        OP_CONNECTION => {
            let id = record.header.u32("conn")?;
            let fields = RecordHeader::parse(record.data)?;
            let connection = Connection {
                id: ConnectionId(id),
                topic: fields.string("topic")?,
                msg_type: MessageType {
                    name: fields.string("type")?,
                    md5sum: fields.string("md5sum")?,
                    definition: fields.string("message_definition").unwrap_or_default(),
                },
            };
            // connection records repeat at the end of the file
            connections.entry(id).or_insert(connection);
        }
        OP_MSG_DATA => entries.push(Entry {
            conn: record.header.u32("conn")?,
            timestamp_ns: record.header.time("time")?,
            start: record.data_offset,
            end: record.data_offset + record.data.len(),
        }),
        _ => {}
    }
    Ok(())
}

impl MessageSource for BagReader {
    fn connections(&self) -> Vec<Connection> {
        self.connections.values().cloned().collect()
    }

    fn messages<'a>(
        &'a self,
        topics: &[&str],
    ) -> Box<dyn Iterator<Item = Result<RawMessage>> + 'a> {
        let wanted: BTreeSet<u32> = self
            .connections
            .values()
            .filter(|c| topics.is_empty() || topics.contains(&c.topic.as_str()))
            .map(|c| c.id.0)
            .collect();
        Box::new(
            self.entries
                .iter()
                .filter(move |e| wanted.contains(&e.conn))
                .map(move |e| {
                    Ok(RawMessage {
                        topic: self.connections[&e.conn].topic.clone(),
                        timestamp_ns: e.timestamp_ns,
                        data: self.buf[e.start..e.end].to_vec(),
                    })
                }),
        )
    }
}

// --- writer ---

#[derive(Debug)]
struct ChunkInfo {
    position: u64,
    start_ns: u64,
    end_ns: u64,
    counts: Vec<(u32, u32)>,
}

/// ROS1 bag v2.0 writer with uncompressed chunks.
pub struct BagWriter<W: Write + Seek> {
    out: W,
    label: PathBuf,
    connections: Vec<Connection>,
    /// Connection record already emitted into a chunk.
    announced: Vec<bool>,
    chunk: Vec<u8>,
    chunk_index: BTreeMap<u32, Vec<(u64, u32)>>,
    chunk_start_ns: u64,
    chunk_end_ns: u64,
    chunk_infos: Vec<ChunkInfo>,
    finished: bool,
}

impl BagWriter<BufWriter<File>> {
    /// Create (or truncate) a bag file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| SpoofError::io(path, e))?;
        BagWriter::new(BufWriter::new(file), path)
    }
}

impl<W: Write + Seek> BagWriter<W> {
    /// Start a bag on `out`; `label` names the destination in error messages.
    pub fn new<P: Into<PathBuf>>(out: W, label: P) -> Result<Self> {
        let mut writer = BagWriter {
            out,
            label: label.into(),
            connections: Vec::new(),
            announced: Vec::new(),
            chunk: Vec::new(),
            chunk_index: BTreeMap::new(),
            chunk_start_ns: u64::MAX,
            chunk_end_ns: 0,
            chunk_infos: Vec::new(),
            finished: false,
        };
        writer.emit(MAGIC)?;
        writer.emit(&file_header_record(0, 0, 0))?;
        Ok(writer)
    }

    /// Finish the bag if needed and hand back the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.out)
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        self.out
            .write_all(bytes)
            .map_err(|e| SpoofError::io(self.label.clone(), e))
    }

    fn position(&mut self) -> Result<u64> {
        self.out
            .stream_position()
            .map_err(|e| SpoofError::io(self.label.clone(), e))
    }

    fn flush_chunk(&mut self) -> Result<()> {
        if self.chunk.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.chunk);
        let index = std::mem::take(&mut self.chunk_index);
        let position = self.position()?;

        let mut out = Vec::with_capacity(chunk.len() + 64);
        encode_record(
            &mut out,
            &[
                ("op", vec![OP_CHUNK]),
                ("compression", b"none".to_vec()),
                ("size", (chunk.len() as u32).to_le_bytes().to_vec()),
            ],
            &chunk,
        );
        for (conn, stamps) in &index {
            let mut data = Vec::with_capacity(stamps.len() * 12);
            for (stamp_ns, offset) in stamps {
                wire::write_time(&mut data, *stamp_ns);
                wire::write_u32(&mut data, *offset);
            }
            encode_record(
                &mut out,
                &[
                    ("op", vec![OP_INDEX_DATA]),
                    ("ver", 1u32.to_le_bytes().to_vec()),
                    ("conn", conn.to_le_bytes().to_vec()),
                    ("count", (stamps.len() as u32).to_le_bytes().to_vec()),
                ],
                &data,
            );
        }
        self.emit(&out)?;

        self.chunk_infos.push(ChunkInfo {
            position,
            start_ns: self.chunk_start_ns,
            end_ns: self.chunk_end_ns,
            counts: index
                .iter()
                .map(|(conn, stamps)| (*conn, stamps.len() as u32))
                .collect(),
        });
        self.chunk_start_ns = u64::MAX;
        self.chunk_end_ns = 0;
        Ok(())
    }
}

impl<W: Write + Seek> MessageSink for BagWriter<W> {
    fn add_connection(&mut self, topic: &str, msg_type: &MessageType) -> Result<ConnectionId> {
        if self.finished {
            return Err(SpoofError::Format("bag is already finished".into()));
        }
        let id = ConnectionId(self.connections.len() as u32);
        self.connections.push(Connection {
            id,
            topic: topic.to_string(),
            msg_type: msg_type.clone(),
        });
        self.announced.push(false);
        Ok(id)
    }

    fn write(&mut self, connection: ConnectionId, timestamp_ns: u64, data: &[u8]) -> Result<()> {
        if self.finished {
            return Err(SpoofError::Format("bag is already finished".into()));
        }
        let idx = connection.0 as usize;
        if idx >= self.connections.len() {
            return Err(SpoofError::Format(format!(
                "unknown connection id {}",
                connection.0
            )));
        }
        if !self.announced[idx] {
            connection_record(&mut self.chunk, &self.connections[idx]);
            self.announced[idx] = true;
        }
        let offset = self.chunk.len() as u32;
        encode_record(
            &mut self.chunk,
            &[
                ("op", vec![OP_MSG_DATA]),
                ("conn", connection.0.to_le_bytes().to_vec()),
                ("time", time_bytes(timestamp_ns)),
            ],
            data,
        );
        self.chunk_index
            .entry(connection.0)
            .or_default()
            .push((timestamp_ns, offset));
        self.chunk_start_ns = self.chunk_start_ns.min(timestamp_ns);
        self.chunk_end_ns = self.chunk_end_ns.max(timestamp_ns);

        if self.chunk.len() >= CHUNK_THRESHOLD {
            self.flush_chunk()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.flush_chunk()?;
        let index_pos = self.position()?;

        let mut out = Vec::new();
        for connection in &self.connections {
            connection_record(&mut out, connection);
        }
        for info in &self.chunk_infos {
            let mut data = Vec::with_capacity(info.counts.len() * 8);
            for (conn, count) in &info.counts {
                wire::write_u32(&mut data, *conn);
                wire::write_u32(&mut data, *count);
            }
            encode_record(
                &mut out,
                &[
                    ("op", vec![OP_CHUNK_INFO]),
                    ("ver", 1u32.to_le_bytes().to_vec()),
                    ("chunk_pos", info.position.to_le_bytes().to_vec()),
                    ("start_time", time_bytes(info.start_ns)),
                    ("end_time", time_bytes(info.end_ns)),
                    ("count", (info.counts.len() as u32).to_le_bytes().to_vec()),
                ],
                &data,
            );
        }
        self.emit(&out)?;

        let header = file_header_record(
            index_pos,
            self.connections.len() as u32,
            self.chunk_infos.len() as u32,
        );
        self.out
            .seek(SeekFrom::Start(MAGIC.len() as u64))
            .map_err(|e| SpoofError::io(self.label.clone(), e))?;
        self.emit(&header)?;
        self.out
            .seek(SeekFrom::End(0))
            .map_err(|e| SpoofError::io(self.label.clone(), e))?;
        self.out
            .flush()
            .map_err(|e| SpoofError::io(self.label.clone(), e))?;
        self.finished = true;
        log::debug!(
            "Finished {} ({} connections, {} chunks)",
            self.label.display(),
            self.connections.len(),
            self.chunk_infos.len()
        );
        Ok(())
    }
}

// --- in-memory log ---

/// Log held entirely in memory; implements both [`MessageSource`] and [`MessageSink`].
#[derive(Clone, Debug, Default)]
pub struct MemoryLog {
    connections: Vec<Connection>,
    messages: Vec<(ConnectionId, u64, Vec<u8>)>,
    finished: bool,
}

impl MemoryLog {
    pub fn new() -> Self {
        MemoryLog::default()
    }

    /// Append a message, creating the topic's connection on first use.
    pub fn push(&mut self, topic: &str, msg_type: &MessageType, timestamp_ns: u64, data: Vec<u8>) {
        let id = match self.connections.iter().find(|c| c.topic == topic) {
            Some(c) => c.id,
            None => {
                let id = ConnectionId(self.connections.len() as u32);
                self.connections.push(Connection {
                    id,
                    topic: topic.to_string(),
                    msg_type: msg_type.clone(),
                });
                id
            }
        };
        self.messages.push((id, timestamp_ns, data));
    }

    /// Messages on `topic` in log-time order.
    pub fn messages_on(&self, topic: &str) -> Vec<RawMessage> {
        self.messages(&[topic]).filter_map(|m| m.ok()).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl MessageSource for MemoryLog {
    fn connections(&self) -> Vec<Connection> {
        self.connections.clone()
    }

    fn messages<'a>(
        &'a self,
        topics: &[&str],
    ) -> Box<dyn Iterator<Item = Result<RawMessage>> + 'a> {
        let wanted: BTreeSet<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| topics.is_empty() || topics.contains(&c.topic.as_str()))
            .map(|c| c.id)
            .collect();
        let mut selected: Vec<&(ConnectionId, u64, Vec<u8>)> = self
            .messages
            .iter()
            .filter(|(id, _, _)| wanted.contains(id))
            .collect();
        selected.sort_by_key(|(_, stamp, _)| *stamp);
        Box::new(selected.into_iter().map(move |(id, stamp, data)| {
            Ok(RawMessage {
                topic: self.connections[id.0 as usize].topic.clone(),
                timestamp_ns: *stamp,
                data: data.clone(),
            })
        }))
    }
}

impl MessageSink for MemoryLog {
    fn add_connection(&mut self, topic: &str, msg_type: &MessageType) -> Result<ConnectionId> {
        let id = ConnectionId(self.connections.len() as u32);
        self.connections.push(Connection {
            id,
            topic: topic.to_string(),
            msg_type: msg_type.clone(),
        });
        Ok(id)
    }

    fn write(&mut self, connection: ConnectionId, timestamp_ns: u64, data: &[u8]) -> Result<()> {
        if self.finished {
            return Err(SpoofError::Format("log is already finished".into()));
        }
        if connection.0 as usize >= self.connections.len() {
            return Err(SpoofError::Format(format!(
                "unknown connection id {}",
                connection.0
            )));
        }
        self.messages.push((connection, timestamp_ns, data.to_vec()));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor as IoCursor;

    fn write_bag(messages: &[(&str, u64, Vec<u8>)]) -> Vec<u8> {
        let mut writer = BagWriter::new(IoCursor::new(Vec::new()), "test.bag").unwrap();
        let mut ids: BTreeMap<String, ConnectionId> = BTreeMap::new();
        for (topic, stamp, data) in messages {
            let id = match ids.get(*topic) {
                Some(id) => *id,
                None => {
                    let id = writer
                        .add_connection(topic, &MessageType::point_cloud2())
                        .unwrap();
                    ids.insert(topic.to_string(), id);
                    id
                }
            };
            writer.write(id, *stamp, data).unwrap();
        }
        writer.into_inner().unwrap().into_inner()
    }

    #[test]
    fn writer_output_reads_back() {
        let bytes = write_bag(&[
            ("/points", 1_000_000_000, vec![1, 2, 3]),
            ("/imu", 1_000_000_500, vec![4]),
            ("/points", 1_100_000_000, vec![5, 6]),
        ]);
        assert!(bytes.starts_with(MAGIC));
        let reader = BagReader::from_bytes(bytes).unwrap();
        assert_eq!(reader.message_count(), 3);
        assert_eq!(reader.start_time_ns(), Some(1_000_000_000));
        assert_eq!(reader.end_time_ns(), Some(1_100_000_000));

        let conns = reader.connections();
        assert_eq!(conns.len(), 2);
        assert_eq!(conns[0].topic, "/points");
        assert_eq!(conns[0].msg_type, MessageType::point_cloud2());

        let all: Vec<RawMessage> = reader.messages(&[]).map(|m| m.unwrap()).collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].topic, "/imu");

        let points: Vec<RawMessage> = reader.messages(&["/points"]).map(|m| m.unwrap()).collect();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].data, vec![1, 2, 3]);
        assert_eq!(points[1].data, vec![5, 6]);
        assert_eq!(points[1].timestamp_ns, 1_100_000_000);
    }

    #[test]
    fn file_header_is_patched() {
        let bytes = write_bag(&[("/points", 5, vec![0; 10])]);
        let mut cur = Cursor::new(&bytes[MAGIC.len()..]);
        let record = read_record(&mut cur, MAGIC.len()).unwrap();
        assert_eq!(record.header.op().unwrap(), OP_FILE_HEADER);
        assert_eq!(record.header.u32("conn_count").unwrap(), 1);
        assert_eq!(record.header.u32("chunk_count").unwrap(), 1);
        let index_pos = Cursor::new(record.header.get("index_pos").unwrap())
            .read_u64()
            .unwrap();
        assert!(index_pos as usize > MAGIC.len() + FILE_HEADER_LENGTH);
        assert!((index_pos as usize) < bytes.len());
        // the record after the index position is a connection record
        let mut tail = Cursor::new(&bytes[index_pos as usize..]);
        let first = read_record(&mut tail, index_pos as usize).unwrap();
        assert_eq!(first.header.op().unwrap(), OP_CONNECTION);
    }

    #[test]
    fn large_payloads_span_chunks() {
        let big = vec![7u8; CHUNK_THRESHOLD / 2 + 1];
        let bytes = write_bag(&[
            ("/points", 1, big.clone()),
            ("/points", 2, big.clone()),
            ("/points", 3, big.clone()),
        ]);
        let mut cur = Cursor::new(&bytes[MAGIC.len()..]);
        let header = read_record(&mut cur, MAGIC.len()).unwrap();
        assert_eq!(header.header.u32("chunk_count").unwrap(), 2);

        let reader = BagReader::from_bytes(bytes).unwrap();
        let stamps: Vec<u64> = reader
            .messages(&["/points"])
            .map(|m| m.unwrap().timestamp_ns)
            .collect();
        assert_eq!(stamps, vec![1, 2, 3]);
    }

    #[test]
    fn messages_are_served_in_time_order() {
        let bytes = write_bag(&[("/a", 30, vec![3]), ("/a", 10, vec![1]), ("/b", 20, vec![2])]);
        let reader = BagReader::from_bytes(bytes).unwrap();
        let data: Vec<u8> = reader.messages(&[]).map(|m| m.unwrap().data[0]).collect();
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[test]
    fn bad_magic_is_format_error() {
        let err = BagReader::from_bytes(b"#ROSBAG V1.2\n".to_vec()).err().unwrap();
        assert!(matches!(err, SpoofError::Format(_)));
    }

    #[test]
    fn compressed_chunk_is_rejected() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend(file_header_record(0, 0, 1));
        encode_record(
            &mut bytes,
            &[
                ("op", vec![OP_CHUNK]),
                ("compression", b"bz2".to_vec()),
                ("size", 0u32.to_le_bytes().to_vec()),
            ],
            &[],
        );
        let err = BagReader::from_bytes(bytes).err().unwrap();
        assert!(err.to_string().contains("bz2"));
    }

    #[test]
    fn write_after_finish_fails() {
        let mut writer = BagWriter::new(IoCursor::new(Vec::new()), "test.bag").unwrap();
        let id = writer.add_connection("/points", &MessageType::point_cloud2()).unwrap();
        writer.finish().unwrap();
        assert!(writer.write(id, 0, &[1]).is_err());
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let err = BagReader::open("definitely_missing.bag").err().unwrap();
        assert!(matches!(err, SpoofError::Io { .. }));
    }

    #[test]
    fn memory_log_roundtrip() {
        let mut log = MemoryLog::new();
        log.push("/imu", &MessageType::imu(), 20, vec![2]);
        log.push("/points", &MessageType::point_cloud2(), 10, vec![1]);
        log.push("/imu", &MessageType::imu(), 5, vec![0]);
        assert_eq!(log.connections().len(), 2);
        let imu = log.messages_on("/imu");
        assert_eq!(imu.len(), 2);
        assert_eq!(imu[0].timestamp_ns, 5);
        assert_eq!(log.connection_for("/points").unwrap().msg_type.name, POINTCLOUD2_TYPE);

        let mut out = MemoryLog::new();
        let id = out.add_connection("/x", &MessageType::imu()).unwrap();
        out.write(id, 1, &[9]).unwrap();
        assert!(out.write(ConnectionId(4), 1, &[9]).is_err());
        out.finish().unwrap();
        assert!(out.is_finished());
        assert!(out.write(id, 2, &[9]).is_err());
        assert_eq!(out.messages_on("/x")[0].data, vec![9]);
    }
}
