//! Function registry and record-level functions.
//!
//! Functions are resolved by signature. A [`FunctionGenerator`] acts as the
//! polymorphism seam: it consumes an open signature (argument type shapes
//! with holes) and yields concrete, closed signatures it can instantiate.
//! The registry is process-wide and immutable after initialisation except
//! via the registration APIs, which reject signature collisions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cost::Cost;
use crate::error::{QuiverError, Result};
use crate::expr::DistanceMetric;
use crate::types::{DataType, Value};

/// A closed function signature: name plus concrete argument types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub name: String,
    pub arguments: Vec<DataType>,
}

impl Signature {
    pub fn new(name: impl Into<String>, arguments: Vec<DataType>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            arguments,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

/// An open signature: argument positions may be holes (`None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSignature {
    pub name: String,
    pub arguments: Vec<Option<DataType>>,
}

impl OpenSignature {
    pub fn new(name: impl Into<String>, arguments: Vec<Option<DataType>>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            arguments,
        }
    }

    /// Whether a closed signature fills this open signature's holes.
    pub fn covers(&self, closed: &Signature) -> bool {
        self.name == closed.name
            && self.arguments.len() == closed.arguments.len()
            && self
                .arguments
                .iter()
                .zip(&closed.arguments)
                .all(|(open, concrete)| open.map_or(true, |t| t == *concrete))
    }
}

/// A function applied record-by-record during execution.
pub trait RecordFunction: Send + Sync {
    /// The closed signature of this function.
    fn signature(&self) -> &Signature;

    /// The type of the produced value.
    fn return_type(&self) -> DataType;

    /// The cost of one invocation.
    fn cost(&self) -> Cost;

    /// Apply the function to one argument tuple.
    fn invoke(&self, arguments: &[Value]) -> Result<Value>;
}

/// Resolves open signatures to closed ones and instantiates functions.
pub trait FunctionGenerator: Send + Sync {
    /// The closed signatures this generator offers for an open signature.
    fn resolve(&self, open: &OpenSignature) -> Vec<Signature>;

    /// Instantiate the function for a closed signature.
    fn instantiate(&self, signature: &Signature) -> Result<Arc<dyn RecordFunction>>;
}

/// The process-wide function registry.
pub struct FunctionRegistry {
    functions: RwLock<HashMap<Signature, Arc<dyn RecordFunction>>>,
    generators: RwLock<Vec<Arc<dyn FunctionGenerator>>>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self {
            functions: RwLock::new(HashMap::new()),
            generators: RwLock::new(Vec::new()),
        }
    }

    /// Create a registry with the stock distance functions registered.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry
            .register_generator(Arc::new(DistanceFunctionGenerator))
            .expect("stock generator registration cannot collide");
        registry
    }

    /// Register a concrete function. Rejects signature collisions.
    pub fn register(&self, function: Arc<dyn RecordFunction>) -> Result<()> {
        let mut functions = self.functions.write();
        let signature = function.signature().clone();
        if functions.contains_key(&signature) {
            return Err(QuiverError::catalogue(format!(
                "function {signature} is already registered"
            )));
        }
        functions.insert(signature, function);
        Ok(())
    }

    /// Register a function generator.
    pub fn register_generator(&self, generator: Arc<dyn FunctionGenerator>) -> Result<()> {
        self.generators.write().push(generator);
        Ok(())
    }

    /// Obtain the function for a closed signature.
    ///
    /// Falls back to the registered generators when no concrete function
    /// matches; a generated function is memoised under its signature.
    pub fn obtain(&self, signature: &Signature) -> Result<Arc<dyn RecordFunction>> {
        if let Some(function) = self.functions.read().get(signature) {
            return Ok(function.clone());
        }

        let open = OpenSignature::new(
            signature.name.clone(),
            signature.arguments.iter().map(|t| Some(*t)).collect(),
        );
        for generator in self.generators.read().iter() {
            if generator.resolve(&open).iter().any(|s| s == signature) {
                let function = generator.instantiate(signature)?;
                self.functions
                    .write()
                    .entry(signature.clone())
                    .or_insert_with(|| function.clone());
                return Ok(function);
            }
        }

        Err(QuiverError::catalogue(format!(
            "no function registered for {signature}"
        )))
    }

    /// Resolve an open signature to every closed signature on offer.
    pub fn resolve(&self, open: &OpenSignature) -> Vec<Signature> {
        let mut signatures: Vec<Signature> = self
            .functions
            .read()
            .keys()
            .filter(|s| open.covers(s))
            .cloned()
            .collect();
        for generator in self.generators.read().iter() {
            for signature in generator.resolve(open) {
                if !signatures.contains(&signature) {
                    signatures.push(signature);
                }
            }
        }
        signatures
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A distance kernel over two equally typed vector arguments.
struct DistanceFunction {
    signature: Signature,
    metric: DistanceMetric,
    dimension: usize,
}

impl RecordFunction for DistanceFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self) -> DataType {
        DataType::Double
    }

    fn cost(&self) -> Cost {
        Cost::cpu(self.metric.flops(self.dimension))
    }

    fn invoke(&self, arguments: &[Value]) -> Result<Value> {
        let [probe, query] = arguments else {
            return Err(QuiverError::type_error(format!(
                "{} expects two arguments, got {}",
                self.signature,
                arguments.len()
            )));
        };
        let distance = self
            .metric
            .compute(&probe.try_as_f64_vector()?, &query.try_as_f64_vector()?)?;
        Ok(Value::Double(distance))
    }
}

/// Generator offering every distance metric over float and double vectors
/// of any dimension.
struct DistanceFunctionGenerator;

const METRICS: [DistanceMetric; 5] = [
    DistanceMetric::Euclidean,
    DistanceMetric::SquaredEuclidean,
    DistanceMetric::Manhattan,
    DistanceMetric::Cosine,
    DistanceMetric::InnerProduct,
];

fn metric_for_name(name: &str) -> Option<DistanceMetric> {
    METRICS.iter().copied().find(|m| m.function_name() == name)
}

fn vector_dimension(data_type: &DataType) -> Option<usize> {
    match data_type {
        DataType::FloatVector(n) | DataType::DoubleVector(n) => Some(*n),
        _ => None,
    }
}

impl FunctionGenerator for DistanceFunctionGenerator {
    fn resolve(&self, open: &OpenSignature) -> Vec<Signature> {
        if metric_for_name(&open.name).is_none() || open.arguments.len() != 2 {
            return Vec::new();
        }
        // The dimension must be pinned by at least one concrete argument.
        let dimension = open
            .arguments
            .iter()
            .flatten()
            .find_map(vector_dimension);
        let Some(n) = dimension else {
            return Vec::new();
        };
        [DataType::FloatVector(n), DataType::DoubleVector(n)]
            .into_iter()
            .map(|t| Signature::new(open.name.clone(), vec![t, t]))
            .filter(|s| open.covers(s))
            .collect()
    }

    fn instantiate(&self, signature: &Signature) -> Result<Arc<dyn RecordFunction>> {
        let metric = metric_for_name(&signature.name).ok_or_else(|| {
            QuiverError::catalogue(format!("unknown distance function {}", signature.name))
        })?;
        let dimension = signature
            .arguments
            .first()
            .and_then(vector_dimension)
            .ok_or_else(|| {
                QuiverError::type_error(format!(
                    "{signature} is not a vector distance signature"
                ))
            })?;
        Ok(Arc::new(DistanceFunction {
            signature: signature.clone(),
            metric,
            dimension,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obtain_distance_function() {
        let registry = FunctionRegistry::new();
        let signature = Signature::new(
            "euclidean",
            vec![DataType::FloatVector(2), DataType::FloatVector(2)],
        );
        let function = registry.obtain(&signature).unwrap();

        let result = function
            .invoke(&[
                Value::FloatVector(vec![0.0, 0.0]),
                Value::FloatVector(vec![3.0, 4.0]),
            ])
            .unwrap();
        assert_eq!(result, Value::Double(5.0));
    }

    #[test]
    fn test_resolution_by_open_signature() {
        let registry = FunctionRegistry::new();
        let open = OpenSignature::new(
            "cosine",
            vec![Some(DataType::FloatVector(4)), None],
        );
        let signatures = registry.resolve(&open);
        assert_eq!(signatures.len(), 1);
        assert_eq!(
            signatures[0].arguments,
            vec![DataType::FloatVector(4), DataType::FloatVector(4)]
        );
    }

    #[test]
    fn test_unknown_function_fails() {
        let registry = FunctionRegistry::new();
        let signature = Signature::new("levenshtein", vec![DataType::String]);
        assert!(registry.obtain(&signature).is_err());
    }

    #[test]
    fn test_collision_is_rejected() {
        let registry = FunctionRegistry::new();
        let signature = Signature::new(
            "manhattan",
            vec![DataType::DoubleVector(3), DataType::DoubleVector(3)],
        );
        let function = registry.obtain(&signature).unwrap();
        assert!(registry.register(function).is_err());
    }
}
