use crate::apply::{ApplyOutput, ApplyTask, Engine};
use crate::config::EngineConfig;
use crate::descriptor::{Descriptor, ReturnKind, StaticRegistry};
use crate::dimension;
use crate::error::ApplyError;
use crate::lexer::{self, Token, TokenKind};
use crate::models::*;
use crate::partition::FragmentIdSet;
use crate::pid::Pid;
use crate::storage::{
    FragmentShape, FragmentTransform, StorageConnector, StorageError, StorageSession,
};
use crate::store::{
    DatacubeRow, DimensionArrays, DimensionRow, FragmentRow, MetadataStore, StoreError, TaskRow,
};
use crate::types::{Category, DataType};

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

/// Create a TaskParameters object with only required fields set.
pub(crate) fn get_test_task_parameters() -> TaskParameters {
    TaskParameters {
        query: "oph_abs('oph_double','oph_double',measure)".to_string(),
        dim_query: None,
        cube: "http://127.0.0.1/ophidia/1/1".to_string(),
        measure: None,
        measure_type: TypeRequest::default(),
        check_type: YesNo::default(),
        compressed: CompressionRequest::default(),
        description: None,
        sessionid: None,
        jobid: None,
    }
}

/// Create a TaskParameters object with all fields set.
pub(crate) fn get_test_task_parameters_optional() -> TaskParameters {
    TaskParameters {
        query: "oph_abs('oph_double','oph_double',measure)".to_string(),
        dim_query: Some("oph_abs('oph_double','oph_double',dimension)".to_string()),
        cube: "http://127.0.0.1/ophidia/1/1".to_string(),
        measure: Some("absolute".to_string()),
        measure_type: TypeRequest::Explicit(DataType::Double),
        check_type: YesNo::No,
        compressed: CompressionRequest::Yes,
        description: Some("absolute values".to_string()),
        sessionid: Some("session".to_string()),
        jobid: Some("7".to_string()),
    }
}

pub(crate) fn server_uri() -> Url {
    Url::parse("http://127.0.0.1/ophidia").unwrap()
}

/// Registry of the primitives understood by [MemoryStorage].
pub(crate) fn registry() -> StaticRegistry {
    StaticRegistry::new([
        Descriptor::new("oph_abs", ReturnKind::BinaryArray, Category::Simple),
        Descriptor::new("oph_mul", ReturnKind::BinaryArray, Category::Simple),
        Descriptor::new("oph_cast", ReturnKind::BinaryArray, Category::Simple),
        Descriptor::new("oph_sum", ReturnKind::BinaryArray, Category::Aggregate),
        Descriptor::new("oph_rowsum", ReturnKind::BinaryArray, Category::Reduce),
    ])
}

pub(crate) fn f64_bytes(values: &[f64]) -> Bytes {
    values
        .iter()
        .flat_map(|value| value.to_ne_bytes())
        .collect::<Vec<u8>>()
        .into()
}

fn f64_values(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| f64::from_ne_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// Measure values of the row with key `key`, with alternating signs.
fn row_values(key: u64, elements: u64) -> Vec<f64> {
    (0..elements)
        .map(|element| {
            let value = (key * 100 + element) as f64;
            if (key + element) % 2 == 0 {
                value
            } else {
                -value
            }
        })
        .collect()
}

#[derive(Default)]
struct StoreState {
    datacubes: BTreeMap<i64, DatacubeRow>,
    dimensions: BTreeMap<i64, (DimensionRow, DimensionArrays)>,
    fragments: Vec<FragmentRow>,
    tasks: Vec<TaskRow>,
    next_datacube: i64,
    next_dimension: i64,
    fail_task_inserts: bool,
}

/// Metadata store held in memory.
#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn tasks(&self) -> Vec<TaskRow> {
        self.state.lock().unwrap().tasks.clone()
    }

    pub(crate) fn datacube_count(&self) -> usize {
        self.state.lock().unwrap().datacubes.len()
    }

    /// Make every later task insert fail.
    pub(crate) fn fail_task_inserts(&self) {
        self.state.lock().unwrap().fail_task_inserts = true;
    }

    /// Fragments of a datacube, sorted by id.
    pub(crate) fn fragments_of(&self, datacube_id: i64) -> Vec<FragmentRow> {
        let mut fragments: Vec<FragmentRow> = self
            .state
            .lock()
            .unwrap()
            .fragments
            .iter()
            .filter(|fragment| fragment.datacube_id == datacube_id)
            .cloned()
            .collect();
        fragments.sort_by_key(|fragment| fragment.id);
        fragments
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn datacube(&self, id: i64) -> Result<DatacubeRow, StoreError> {
        self.state
            .lock()
            .unwrap()
            .datacubes
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "datacube",
                id,
            })
    }

    async fn dimensions(&self, datacube_id: i64) -> Result<Vec<DimensionRow>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .dimensions
            .values()
            .filter(|(row, _)| row.datacube_id == datacube_id)
            .map(|(row, _)| row.clone())
            .collect())
    }

    async fn dimension_arrays(&self, dimension_id: i64) -> Result<DimensionArrays, StoreError> {
        self.state
            .lock()
            .unwrap()
            .dimensions
            .get(&dimension_id)
            .map(|(_, arrays)| arrays.clone())
            .ok_or(StoreError::NotFound {
                entity: "dimension",
                id: dimension_id,
            })
    }

    async fn insert_datacube(&self, row: &DatacubeRow) -> Result<i64, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.next_datacube += 1;
        let id = state.next_datacube;
        state.datacubes.insert(id, DatacubeRow { id, ..row.clone() });
        Ok(id)
    }

    async fn update_datacube(&self, row: &DatacubeRow) -> Result<(), StoreError> {
        match self.state.lock().unwrap().datacubes.get_mut(&row.id) {
            Some(stored) => {
                *stored = row.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "datacube",
                id: row.id,
            }),
        }
    }

    async fn delete_datacube(&self, id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.tasks.retain(|task| task.output_datacube != id);
        state
            .datacubes
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                entity: "datacube",
                id,
            })
    }

    async fn insert_task(&self, row: &TaskRow) -> Result<i64, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_task_inserts {
            return Err(StoreError::Backend("task table is read-only".into()));
        }
        state.tasks.push(row.clone());
        Ok(state.tasks.len() as i64)
    }

    async fn fragments(
        &self,
        datacube_id: i64,
        ids: &[i64],
    ) -> Result<Vec<FragmentRow>, StoreError> {
        Ok(self
            .fragments_of(datacube_id)
            .into_iter()
            .filter(|fragment| ids.contains(&fragment.id))
            .collect())
    }

    async fn insert_fragment(&self, row: &FragmentRow) -> Result<(), StoreError> {
        self.state.lock().unwrap().fragments.push(row.clone());
        Ok(())
    }

    async fn insert_dimension(
        &self,
        row: &DimensionRow,
        arrays: &DimensionArrays,
    ) -> Result<i64, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.next_dimension += 1;
        let id = state.next_dimension;
        state
            .dimensions
            .insert(id, (DimensionRow { id, ..row.clone() }, arrays.clone()));
        Ok(id)
    }
}

type Rows = Vec<Vec<f64>>;

/// Storage connector holding fragments in memory as rows of `f64` elements.
///
/// Queries are evaluated by a small interpreter of the primitives in [registry]. Compression
/// primitives leave their argument untouched.
#[derive(Clone, Default)]
pub(crate) struct MemoryStorage {
    fragments: Arc<Mutex<HashMap<String, Rows>>>,
    sessions: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, name: &str, rows: Rows) {
        self.fragments.lock().unwrap().insert(name.to_string(), rows);
    }

    pub(crate) fn rows(&self, name: &str) -> Option<Rows> {
        self.fragments.lock().unwrap().get(name).cloned()
    }

    pub(crate) fn sessions_opened(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

struct MemorySession {
    fragments: Arc<Mutex<HashMap<String, Rows>>>,
}

#[async_trait]
impl StorageSession for MemorySession {
    async fn transform(
        &mut self,
        transform: &FragmentTransform<'_>,
    ) -> Result<Option<u64>, StorageError> {
        let input = self
            .fragments
            .lock()
            .unwrap()
            .get(transform.input)
            .cloned()
            .ok_or_else(|| StorageError::FragmentNotFound(transform.input.to_string()))?;
        let rows = match evaluate(transform.query, &input, transform.bindings)? {
            Value::Rows(rows) => rows,
            _ => {
                return Err(StorageError::Query(format!(
                    "{} does not depend on the measure",
                    transform.query
                )))
            }
        };
        let count = rows.len() as u64;
        self.fragments
            .lock()
            .unwrap()
            .insert(transform.output.to_string(), rows);
        Ok(transform.count_rows.then_some(count))
    }

    async fn probe(&mut self, fragment: &str) -> Result<FragmentShape, StorageError> {
        let fragments = self.fragments.lock().unwrap();
        let rows = fragments
            .get(fragment)
            .ok_or_else(|| StorageError::FragmentNotFound(fragment.to_string()))?;
        Ok(FragmentShape {
            elements_per_row: rows.first().map_or(0, |row| row.len() as u64),
            rows: rows.len() as u64,
        })
    }
}

#[async_trait]
impl StorageConnector for MemoryStorage {
    async fn open(&self, _dbms: i64, _db: i64) -> Result<Box<dyn StorageSession>, StorageError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            fragments: self.fragments.clone(),
        }))
    }

    async fn evaluate(&self, query: &str, bindings: &[Bytes]) -> Result<Bytes, StorageError> {
        match evaluate(query, &[], bindings)? {
            Value::Array(values) => Ok(f64_bytes(&values)),
            _ => Err(StorageError::Query(format!("{query} does not produce an array"))),
        }
    }
}

/// Result of evaluating part of a query.
enum Value {
    /// One array per row of the fragment
    Rows(Rows),
    /// A single array, applied to every row
    Array(Vec<f64>),
    /// A quoted argument
    Literal,
}

impl Value {
    fn map(self, f: impl Fn(&[f64]) -> Vec<f64>) -> Value {
        match self {
            Value::Rows(rows) => Value::Rows(rows.iter().map(|row| f(row)).collect()),
            Value::Array(values) => Value::Array(f(&values)),
            Value::Literal => Value::Literal,
        }
    }
}

fn multiply(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(a, b)| a * b).collect()
}

fn evaluate(query: &str, measure: &[Vec<f64>], bindings: &[Bytes]) -> Result<Value, StorageError> {
    let tokens =
        lexer::tokenize(query).map_err(|err| StorageError::Query(err.to_string()))?;
    let mut evaluator = Evaluator {
        query,
        tokens,
        position: 0,
        measure,
        bindings: bindings.iter(),
    };
    evaluator.value()
}

struct Evaluator<'a> {
    query: &'a str,
    tokens: Vec<Token>,
    position: usize,
    measure: &'a [Vec<f64>],
    bindings: std::slice::Iter<'a, Bytes>,
}

impl Evaluator<'_> {
    fn next(&mut self) -> Result<Token, StorageError> {
        let token = self
            .tokens
            .get(self.position)
            .copied()
            .ok_or_else(|| StorageError::Query(format!("unexpected end of {}", self.query)))?;
        self.position += 1;
        Ok(token)
    }

    fn peek(&self) -> Option<TokenKind> {
        self.tokens.get(self.position).map(|token| token.kind)
    }

    fn value(&mut self) -> Result<Value, StorageError> {
        let token = self.next()?;
        let text = token.text(self.query);
        match token.kind {
            TokenKind::Literal => Ok(Value::Literal),
            TokenKind::Other if text == "?" => {
                let binding = self
                    .bindings
                    .next()
                    .ok_or_else(|| StorageError::Query("missing binding".into()))?;
                Ok(Value::Array(f64_values(binding)))
            }
            TokenKind::Ident if self.peek() == Some(TokenKind::Open) => self.call(text),
            TokenKind::Ident if text == "measure" => Ok(Value::Rows(self.measure.to_vec())),
            _ => Err(StorageError::Query(format!("unexpected {text}"))),
        }
    }

    fn call(&mut self, name: &str) -> Result<Value, StorageError> {
        self.next()?;
        let mut arguments = vec![];
        while self.peek() != Some(TokenKind::Close) {
            match self.value()? {
                Value::Literal => (),
                value => arguments.push(value),
            }
            if self.peek() == Some(TokenKind::Comma) {
                self.next()?;
            }
        }
        self.next()?;
        let mut arguments = arguments.into_iter();
        let first = arguments
            .next()
            .ok_or_else(|| StorageError::Query(format!("{name} has no array argument")))?;
        let value = match name {
            "oph_compress" | "oph_uncompress" | "oph_cast" => first,
            "oph_abs" => first.map(|row| row.iter().map(|value| value.abs()).collect()),
            "oph_sum" => first.map(|row| vec![row.iter().sum()]),
            "oph_rowsum" => match first {
                Value::Rows(rows) => {
                    let width = rows.first().map_or(0, Vec::len);
                    let sum = rows.iter().fold(vec![0.0; width], |acc, row| {
                        acc.iter().zip(row).map(|(a, b)| a + b).collect()
                    });
                    Value::Rows(vec![sum])
                }
                value => value,
            },
            "oph_mul" => arguments.try_fold(first, |acc, value| match (acc, value) {
                (Value::Rows(a), Value::Rows(b)) => Ok(Value::Rows(
                    a.iter().zip(&b).map(|(a, b)| multiply(a, b)).collect(),
                )),
                (Value::Rows(rows), Value::Array(array))
                | (Value::Array(array), Value::Rows(rows)) => Ok(Value::Rows(
                    rows.iter().map(|row| multiply(row, &array)).collect(),
                )),
                (Value::Array(a), Value::Array(b)) => Ok(Value::Array(multiply(&a, &b))),
                _ => Err(StorageError::Query("oph_mul needs array arguments".into())),
            })?,
            _ => return Err(StorageError::Query(format!("unknown primitive {name}"))),
        };
        Ok(value)
    }
}

/// Description of an input datacube.
///
/// Explicit dimensions are `lat`, one value per fragment, and `lon`, one value per row of a
/// fragment. Every dimension holds the labels `1..=size` as `oph_double` values.
#[derive(Clone, Debug)]
pub(crate) struct CubeFixture {
    pub compressed: bool,
    /// Implicit dimensions, outermost first
    pub implicit: Vec<(&'static str, u64)>,
    pub fragments: usize,
    pub tuples_per_fragment: u64,
}

impl Default for CubeFixture {
    fn default() -> Self {
        Self {
            compressed: false,
            implicit: vec![("time", 12)],
            fragments: 3,
            tuples_per_fragment: 4,
        }
    }
}

impl CubeFixture {
    fn elements(&self) -> u64 {
        self.implicit.iter().map(|(_, size)| size).product()
    }

    pub(crate) fn fragment_ids(&self) -> String {
        (1..=self.fragments as i64)
            .collect::<FragmentIdSet>()
            .to_string()
    }

    /// Measure values of the row with key `key`.
    pub(crate) fn row(&self, key: u64) -> Vec<f64> {
        row_values(key, self.elements())
    }

    /// Database of the `id`-th fragment: the first half lives in database 1, the rest in 2.
    fn database(&self, id: usize) -> (i64, i64) {
        if id <= (self.fragments + 1) / 2 {
            (1, 1)
        } else {
            (1, 2)
        }
    }

    /// Number of distinct databases holding fragments.
    pub(crate) fn databases(&self) -> usize {
        (1..=self.fragments)
            .map(|id| self.database(id))
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Register the datacube described by `fixture` in container 1.
///
/// Returns the datacube and its dimensions in declaration order.
pub(crate) async fn insert_cube(
    store: &MemoryStore,
    fixture: &CubeFixture,
) -> (DatacubeRow, Vec<DimensionRow>) {
    let datacube = DatacubeRow {
        id: 0,
        container_id: 1,
        measure: "temperature".into(),
        measure_type: DataType::Double.to_string(),
        compressed: fixture.compressed,
        level: 0,
        fragment_ids: fixture.fragment_ids(),
        tuples_per_fragment: fixture.tuples_per_fragment,
        description: None,
    };
    let id = store.insert_datacube(&datacube).await.unwrap();

    let tuples = fixture.tuples_per_fragment;
    for seq in 1..=fixture.fragments {
        let (dbms, db) = fixture.database(seq);
        let first = (seq as u64 - 1) * tuples + 1;
        store
            .insert_fragment(&FragmentRow {
                id: seq as i64,
                datacube_id: id,
                name: format!("dc{id}_f{seq}"),
                db_instance_id: db,
                dbms_instance_id: dbms,
                key_start: first,
                key_end: first + tuples - 1,
            })
            .await
            .unwrap();
    }

    let explicit = [("lat", fixture.fragments as u64, true), ("lon", tuples, true)];
    let implicit = fixture.implicit.iter().map(|&(name, size)| (name, size, false));
    for (name, size, explicit) in explicit.into_iter().chain(implicit) {
        let labels: Vec<f64> = (1..=size).map(|label| label as f64).collect();
        let row = DimensionRow {
            id: 0,
            datacube_id: id,
            name: name.into(),
            datatype: DataType::Double.to_string(),
            explicit,
            size,
            level: 1,
        };
        let arrays = DimensionArrays {
            index: dimension::index_array(size).unwrap(),
            labels: Some(f64_bytes(&labels)),
            compression: None,
        };
        store.insert_dimension(&row, &arrays).await.unwrap();
    }

    (
        store.datacube(id).await.unwrap(),
        store.dimensions(id).await.unwrap(),
    )
}

/// Fill `storage` with the rows of every fragment of a datacube.
pub(crate) async fn load_fragments(
    store: &MemoryStore,
    storage: &MemoryStorage,
    datacube_id: i64,
) {
    let elements = store
        .dimensions(datacube_id)
        .await
        .unwrap()
        .iter()
        .filter(|dimension| dimension.is_eligible_implicit())
        .map(|dimension| dimension.size)
        .product();
    for fragment in store.fragments_of(datacube_id) {
        let rows = (fragment.key_start..=fragment.key_end)
            .map(|key| row_values(key, elements))
            .collect();
        storage.insert(&fragment.name, rows);
    }
}

/// An engine over an in-memory store and storage holding one input datacube.
pub(crate) struct TestEngine {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryStorage>,
    pub input: DatacubeRow,
}

impl TestEngine {
    pub(crate) async fn new(fixture: &CubeFixture) -> Self {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorage::new());
        let (input, _) = insert_cube(&store, fixture).await;
        load_fragments(&store, &storage, input.id).await;
        let config = EngineConfig {
            log_filter: Some("datacube_apply=warn".to_string()),
            ..Default::default()
        };
        let engine = Engine::init(
            config,
            store.clone(),
            storage.clone(),
            Arc::new(registry()),
        )
        .unwrap();
        Self {
            engine,
            store,
            storage,
            input,
        }
    }

    /// Parameters targeting the input datacube.
    pub(crate) fn parameters(&self, query: &str) -> TaskParameters {
        let mut parameters = get_test_task_parameters();
        parameters.query = query.to_string();
        parameters.cube = self.cube();
        parameters
    }

    /// PID of the input datacube.
    pub(crate) fn cube(&self) -> String {
        Pid::new(server_uri(), self.input.container_id, self.input.id).to_string()
    }

    /// Run an invocation on a group of `size` ranks, returning the result of each rank.
    pub(crate) async fn run(
        &self,
        parameters: &TaskParameters,
        size: usize,
    ) -> Vec<Result<Option<ApplyOutput>, ApplyError>> {
        let handles: Vec<_> = self
            .engine
            .local_group(size)
            .into_iter()
            .map(|mut comm| {
                let engine = self.engine.clone();
                let parameters = parameters.clone();
                tokio::spawn(async move {
                    ApplyTask::new(&engine, &parameters).run(&mut comm).await
                })
            })
            .collect();
        let mut results = vec![];
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }
}
