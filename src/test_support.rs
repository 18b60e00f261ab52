//! Fixtures shared by unit tests: synthetic trajectory directories and a
//! recording embedder.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use image::{Rgb, RgbImage};
use serde_json::json;

use crate::config::EpisodeConfig;
use crate::model::Embedder;

/// Small frames keep image round-trips fast.
pub const TEST_HEIGHT: u32 = 4;
pub const TEST_WIDTH: u32 = 6;

pub fn episode_config() -> EpisodeConfig {
    EpisodeConfig {
        frame_height: TEST_HEIGHT,
        frame_width: TEST_WIDTH,
        use_agent_data: false,
        skip_malformed: false,
    }
}

/// How the serialized trajectory fields are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldFormat {
    /// `<field>.json`.
    #[default]
    Json,
    /// `<field>.pkl`, pickled the way Python pickles numpy objects.
    NumpyPickle,
    /// `<field>.npy`, an object-dtype array wrapping the value, as `np.save`
    /// writes a dict or list.
    ObjectNpy,
}

/// Description of a synthetic trajectory directory.
pub struct TrajectoryFixture {
    /// Number of policy steps.
    pub steps: usize,
    /// Image directories to create, each with `frames` frames.
    pub cameras: Vec<&'static str>,
    /// Frames per camera; defaults to `steps + 1` like the recorder writes.
    pub frames: Option<usize>,
    /// Contents of `annotations/lang_lupus.txt`; `None` leaves it out.
    pub lupus: Option<&'static str>,
    /// Contents of `lang.txt`; `None` leaves it out.
    pub lang: Option<&'static str>,
    /// Writes `agent_data` with this `term_t`.
    pub term_t: Option<usize>,
    /// Serialization of `obs_dict`, `policy_out` and `agent_data`.
    pub format: FieldFormat,
}

impl Default for TrajectoryFixture {
    fn default() -> Self {
        Self {
            steps: 3,
            cameras: vec!["images0"],
            frames: None,
            lupus: Some("pick up the pot\nconfidence: 0.7\npick pot\n"),
            lang: Some("take the silver pot and place it on the top left burner\nconfidence: 1\n"),
            term_t: None,
            format: FieldFormat::Json,
        }
    }
}

/// Write a trajectory directory at `dir`.
///
/// Step `i` has state `[i; 7]`, action `[0.1 * i; 7]`, identity transforms,
/// and camera frames filled with the value `10 + i`.
pub fn write_trajectory(dir: &Path, fixture: &TrajectoryFixture) {
    std::fs::create_dir_all(dir).unwrap();

    let rows = |n: usize| PyValue::Array {
        shape: vec![n, 7],
        values: (0..n).flat_map(|i| [i as f64; 7]).collect(),
    };
    let obs_dict = PyValue::Dict(vec![
        ("state".into(), rows(fixture.steps + 1)),
        ("full_state".into(), rows(fixture.steps + 1)),
        ("desired_state".into(), rows(fixture.steps + 1)),
    ]);
    write_field(dir, "obs_dict", &obs_dict, fixture.format);

    let identity = || PyValue::Array {
        shape: vec![4, 4],
        values: (0..16).map(|k| if k % 5 == 0 { 1.0 } else { 0.0 }).collect(),
    };
    let policy_out = PyValue::List(
        (0..fixture.steps)
            .map(|i| {
                PyValue::Dict(vec![
                    (
                        "actions".into(),
                        PyValue::Array {
                            shape: vec![7],
                            values: vec![i as f64 * 0.1; 7],
                        },
                    ),
                    ("new_robot_transform".into(), identity()),
                    ("delta_robot_transform".into(), identity()),
                    ("policy_type".into(), PyValue::Str("VR_teleop".into())),
                ])
            })
            .collect(),
    );
    write_field(dir, "policy_out", &policy_out, fixture.format);

    if let Some(term_t) = fixture.term_t {
        let agent_data = PyValue::Dict(vec![
            ("term_t".into(), PyValue::Int(term_t as i64)),
            ("traj_ok".into(), PyValue::Bool(true)),
        ]);
        write_field(dir, "agent_data", &agent_data, fixture.format);
    }

    let frames = fixture.frames.unwrap_or(fixture.steps + 1);
    for camera in &fixture.cameras {
        let cam_dir = dir.join(camera);
        std::fs::create_dir_all(&cam_dir).unwrap();
        for i in 0..frames {
            let value = 10 + i as u8;
            RgbImage::from_pixel(TEST_WIDTH, TEST_HEIGHT, Rgb([value; 3]))
                .save(cam_dir.join(format!("im_{i}.png")))
                .unwrap();
        }
    }

    if let Some(lupus) = fixture.lupus {
        std::fs::create_dir_all(dir.join("annotations")).unwrap();
        std::fs::write(dir.join("annotations").join("lang_lupus.txt"), lupus).unwrap();
    }
    if let Some(lang) = fixture.lang {
        std::fs::write(dir.join("lang.txt"), lang).unwrap();
    }
}

fn write_field(dir: &Path, name: &str, value: &PyValue, format: FieldFormat) {
    let (file, bytes) = match format {
        FieldFormat::Json => (format!("{name}.json"), value.to_json().to_string().into_bytes()),
        FieldFormat::NumpyPickle => (format!("{name}.pkl"), numpy_pickle(value)),
        FieldFormat::ObjectNpy => {
            let wrapped = PyValue::ObjectArray {
                shape: vec![],
                items: vec![value.clone()],
            };
            (format!("{name}.npy"), object_npy(&wrapped))
        }
    };
    std::fs::write(dir.join(file), bytes).unwrap();
}

// ---------------------------------------------------------------------------
// Python-side values
// ---------------------------------------------------------------------------

/// A Python value as the trajectory recorder would hold it.
#[derive(Debug, Clone)]
pub enum PyValue {
    Int(i64),
    Bool(bool),
    Str(String),
    /// A float64 `numpy.ndarray` in C order.
    Array { shape: Vec<usize>, values: Vec<f64> },
    /// An object-dtype `numpy.ndarray`; `items` in C order.
    ObjectArray { shape: Vec<usize>, items: Vec<PyValue> },
    List(Vec<PyValue>),
    Dict(Vec<(String, PyValue)>),
}

impl PyValue {
    /// JSON export: arrays become nested lists.
    pub fn to_json(&self) -> serde_json::Value {
        fn nested(shape: &[usize], values: &mut impl Iterator<Item = serde_json::Value>) -> serde_json::Value {
            match shape.split_first() {
                None => values.next().unwrap(),
                Some((&n, rest)) => json!((0..n).map(|_| nested(rest, &mut *values)).collect::<Vec<_>>()),
            }
        }
        match self {
            Self::Int(i) => json!(i),
            Self::Bool(b) => json!(b),
            Self::Str(s) => json!(s),
            Self::Array { shape, values } => nested(shape, &mut values.iter().map(|v| json!(v))),
            Self::ObjectArray { shape, items } => nested(shape, &mut items.iter().map(PyValue::to_json)),
            Self::List(items) => json!(items.iter().map(PyValue::to_json).collect::<Vec<_>>()),
            Self::Dict(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Pickle `value` with protocol 2 using the opcode layout CPython produces
/// for numpy objects: `_reconstruct` + `BUILD` for arrays, a memoized
/// `dtype` recalled for later arrays, and `_codecs.encode` for raw bytes.
pub fn numpy_pickle(value: &PyValue) -> Vec<u8> {
    let mut pickler = NumpyPickler::default();
    pickler.out.extend_from_slice(&[0x80, 2]);
    pickler.value(value);
    pickler.out.push(b'.');
    pickler.out
}

/// An `.npy` file holding an object-dtype array, as `np.save` writes one.
pub fn object_npy(array: &PyValue) -> Vec<u8> {
    let PyValue::ObjectArray { shape, .. } = array else {
        panic!("object_npy needs an object array");
    };
    let dims: Vec<String> = shape.iter().map(|d| format!("{d},")).collect();
    let mut header = format!(
        "{{'descr': '|O', 'fortran_order': False, 'shape': ({}), }}",
        dims.join(" ")
    );
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut out = b"\x93NUMPY\x01\x00".to_vec();
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&numpy_pickle(array));
    out
}

#[derive(Default)]
struct NumpyPickler {
    out: Vec<u8>,
    next_memo: u32,
    globals: HashMap<&'static str, u32>,
    dtypes: HashMap<&'static str, u32>,
}

impl NumpyPickler {
    fn put(&mut self) -> u32 {
        let index = self.next_memo;
        self.next_memo += 1;
        if index < 256 {
            self.out.extend_from_slice(&[b'q', index as u8]);
        } else {
            self.out.push(b'r');
            self.out.extend_from_slice(&index.to_le_bytes());
        }
        index
    }

    fn get(&mut self, index: u32) {
        if index < 256 {
            self.out.extend_from_slice(&[b'h', index as u8]);
        } else {
            self.out.push(b'j');
            self.out.extend_from_slice(&index.to_le_bytes());
        }
    }

    fn global(&mut self, qualified: &'static str) {
        if let Some(&index) = self.globals.get(qualified) {
            self.get(index);
            return;
        }
        self.out.push(b'c');
        self.out.extend_from_slice(qualified.replacen(' ', "\n", 1).as_bytes());
        self.out.push(b'\n');
        let index = self.put();
        self.globals.insert(qualified, index);
    }

    fn int(&mut self, value: i64) {
        if (0..256).contains(&value) {
            self.out.extend_from_slice(&[b'K', value as u8]);
        } else {
            self.out.push(b'J');
            self.out.extend_from_slice(&(value as i32).to_le_bytes());
        }
    }

    fn str(&mut self, value: &str) {
        self.out.push(b'X');
        self.out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.out.extend_from_slice(value.as_bytes());
        self.put();
    }

    /// Python 3 bytes under protocol 2: `_codecs.encode(latin1_text, "latin1")`.
    fn bytes(&mut self, raw: &[u8]) {
        self.global("_codecs encode");
        let text: String = raw.iter().map(|&b| char::from(b)).collect();
        self.str(&text);
        self.str("latin1");
        self.out.extend_from_slice(&[0x86, b'R']);
        self.put();
    }

    fn tuple_of_ints(&mut self, values: &[usize]) {
        match values.len() {
            0 => self.out.push(b')'),
            n @ 1..=3 => {
                for &v in values {
                    self.int(v as i64);
                }
                self.out.push(0x84 + n as u8);
            }
            _ => {
                self.out.push(b'(');
                for &v in values {
                    self.int(v as i64);
                }
                self.out.push(b't');
            }
        }
        self.put();
    }

    fn dtype(&mut self, descr: &'static str, order: &str, flags: i64) {
        if let Some(&index) = self.dtypes.get(descr) {
            self.get(index);
            return;
        }
        self.global("numpy dtype");
        self.str(descr);
        self.out.extend_from_slice(&[0x89, 0x88, 0x87, b'R']);
        let index = self.put();
        self.dtypes.insert(descr, index);
        self.out.extend_from_slice(&[b'(', b'K', 3]);
        self.str(order);
        self.out.extend_from_slice(b"NNN");
        self.int(-1);
        self.int(-1);
        self.int(flags);
        self.out.push(b't');
        self.put();
        self.out.push(b'b');
    }

    fn ndarray_header(&mut self, shape: &[usize]) {
        self.global("numpy.core.multiarray _reconstruct");
        self.global("numpy ndarray");
        self.tuple_of_ints(&[0]);
        self.bytes(b"b");
        self.out.extend_from_slice(&[0x87, b'R']);
        self.put();
        self.out.extend_from_slice(&[b'(', b'K', 1]);
        self.tuple_of_ints(shape);
    }

    fn value(&mut self, value: &PyValue) {
        match value {
            PyValue::Int(i) => self.int(*i),
            PyValue::Bool(b) => self.out.push(if *b { 0x88 } else { 0x89 }),
            PyValue::Str(s) => self.str(s),
            PyValue::Array { shape, values } => {
                self.ndarray_header(shape);
                self.dtype("f8", "<", 0);
                self.out.push(0x89);
                let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                self.bytes(&raw);
                self.out.push(b't');
                self.put();
                self.out.push(b'b');
            }
            PyValue::ObjectArray { shape, items } => {
                self.ndarray_header(shape);
                self.dtype("O8", "|", 63);
                self.out.push(0x89);
                self.out.push(b']');
                self.put();
                self.out.push(b'(');
                for item in items {
                    self.value(item);
                }
                self.out.extend_from_slice(&[b'e', b't']);
                self.put();
                self.out.push(b'b');
            }
            PyValue::List(items) => {
                self.out.push(b']');
                self.put();
                if !items.is_empty() {
                    self.out.push(b'(');
                    for item in items {
                        self.value(item);
                    }
                    self.out.push(b'e');
                }
            }
            PyValue::Dict(entries) => {
                self.out.push(b'}');
                self.put();
                if !entries.is_empty() {
                    self.out.push(b'(');
                    for (key, item) in entries {
                        self.str(key);
                        self.value(item);
                    }
                    self.out.push(b'u');
                }
            }
        }
    }
}

/// An embedder that records every text it is asked to embed and returns a
/// vector filled with the text's length.
pub struct CountingEmbedder {
    dimensions: usize,
    calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl CountingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

impl Embedder for CountingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(text.to_string());
        Ok(vec![text.len() as f32; self.dimensions])
    }
}
