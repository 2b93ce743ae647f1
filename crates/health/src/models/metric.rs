//! Metric descriptors and the registry that selects them

use std::collections::HashSet;

use crate::error::ConfigError;

/// OAuth scopes for the Google Fit read APIs
pub mod scopes {
    pub const ACTIVITY_READ: &str = "https://www.googleapis.com/auth/fitness.activity.read";
    pub const BODY_READ: &str = "https://www.googleapis.com/auth/fitness.body.read";
    pub const LOCATION_READ: &str = "https://www.googleapis.com/auth/fitness.location.read";
    pub const SLEEP_READ: &str = "https://www.googleapis.com/auth/fitness.sleep.read";
    pub const HEART_RATE_READ: &str = "https://www.googleapis.com/auth/fitness.heart_rate.read";
    pub const BLOOD_PRESSURE_READ: &str =
        "https://www.googleapis.com/auth/fitness.blood_pressure.read";
    pub const BLOOD_GLUCOSE_READ: &str =
        "https://www.googleapis.com/auth/fitness.blood_glucose.read";
    pub const OXYGEN_SATURATION_READ: &str =
        "https://www.googleapis.com/auth/fitness.oxygen_saturation.read";
    pub const BODY_TEMPERATURE_READ: &str =
        "https://www.googleapis.com/auth/fitness.body_temperature.read";
}

/// One named column of a composite metric, read from `value[index]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeField {
    pub name: String,
    pub index: usize,
}

impl CompositeField {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

/// Shape of a metric's values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricKind {
    /// A single number per point, written to `column`
    Scalar { column: String },
    /// Several numbers per point (e.g. systolic and diastolic readings)
    Composite { fields: Vec<CompositeField> },
    /// An integer code per point (activity type, sleep stage)
    Categorical { column: String },
}

impl MetricKind {
    /// Value column names, in output order
    pub fn value_columns(&self) -> Vec<&str> {
        match self {
            Self::Scalar { column } | Self::Categorical { column } => vec![column.as_str()],
            Self::Composite { fields } => fields.iter().map(|f| f.name.as_str()).collect(),
        }
    }
}

/// How accumulated points are shaped before they are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationMode {
    /// One row per point
    #[default]
    Raw,
    /// One row per UTC calendar day with the scalar values summed
    DailySum,
}

/// Static description of one remote metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    /// Stable key, used for selection and output file names
    pub key: String,
    /// Remote data type, e.g. `com.google.step_count.delta`
    pub remote_type_name: String,
    /// Optional data source qualifier for the aggregate request
    pub data_source_id: Option<String>,
    /// Folder under the output root
    pub output_folder: String,
    pub kind: MetricKind,
    pub aggregation: AggregationMode,
    /// OAuth scope needed to read this metric
    pub scope: String,
}

impl MetricDescriptor {
    fn new(
        key: impl Into<String>,
        remote_type_name: impl Into<String>,
        output_folder: impl Into<String>,
        kind: MetricKind,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            remote_type_name: remote_type_name.into(),
            data_source_id: None,
            output_folder: output_folder.into(),
            kind,
            aggregation: AggregationMode::Raw,
            scope: scope.into(),
        }
    }

    /// Describe a metric with one numeric value per point
    pub fn scalar(
        key: impl Into<String>,
        remote_type_name: impl Into<String>,
        output_folder: impl Into<String>,
        column: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        let kind = MetricKind::Scalar {
            column: column.into(),
        };
        Self::new(key, remote_type_name, output_folder, kind, scope)
    }

    /// Describe a metric with several numeric values per point
    pub fn composite(
        key: impl Into<String>,
        remote_type_name: impl Into<String>,
        output_folder: impl Into<String>,
        fields: Vec<CompositeField>,
        scope: impl Into<String>,
    ) -> Self {
        let kind = MetricKind::Composite { fields };
        Self::new(key, remote_type_name, output_folder, kind, scope)
    }

    /// Describe a metric whose value is an integer category code
    pub fn categorical(
        key: impl Into<String>,
        remote_type_name: impl Into<String>,
        output_folder: impl Into<String>,
        column: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        let kind = MetricKind::Categorical {
            column: column.into(),
        };
        Self::new(key, remote_type_name, output_folder, kind, scope)
    }

    /// Restrict the aggregate request to a specific data source
    pub fn with_data_source(mut self, data_source_id: impl Into<String>) -> Self {
        self.data_source_id = Some(data_source_id.into());
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationMode) -> Self {
        self.aggregation = aggregation;
        self
    }
}

/// Ordered, validated set of metric descriptors
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    metrics: Vec<MetricDescriptor>,
}

impl MetricRegistry {
    /// Build a registry, rejecting duplicate keys and daily sums on non-scalar metrics
    pub fn new(metrics: Vec<MetricDescriptor>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for metric in &metrics {
            if !seen.insert(metric.key.as_str()) {
                return Err(ConfigError::DuplicateMetric(metric.key.clone()));
            }
            if metric.aggregation == AggregationMode::DailySum
                && !matches!(metric.kind, MetricKind::Scalar { .. })
            {
                return Err(ConfigError::InvalidAggregation(metric.key.clone()));
            }
        }
        Ok(Self { metrics })
    }

    /// The built-in Google Fit catalog
    pub fn google_fit() -> Self {
        Self {
            metrics: default_catalog(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetricDescriptor> {
        self.metrics.iter().find(|m| m.key == key)
    }

    pub fn all(&self) -> &[MetricDescriptor] {
        &self.metrics
    }

    pub fn keys(&self) -> Vec<String> {
        self.metrics.iter().map(|m| m.key.clone()).collect()
    }

    /// Resolve a selection to descriptors in registry declaration order
    ///
    /// An empty selection means every metric. Unknown keys are an error.
    pub fn select(&self, keys: &[String]) -> Result<Vec<&MetricDescriptor>, ConfigError> {
        if keys.is_empty() {
            return Ok(self.metrics.iter().collect());
        }

        if let Some(unknown) = keys.iter().find(|k| self.get(k).is_none()) {
            return Err(ConfigError::UnknownMetric(unknown.clone()));
        }

        Ok(self
            .metrics
            .iter()
            .filter(|m| keys.iter().any(|k| *k == m.key))
            .collect())
    }

    /// Distinct scopes needed by a selection, in first-use order
    pub fn scopes_for(metrics: &[&MetricDescriptor]) -> Vec<String> {
        let mut scopes: Vec<String> = Vec::new();
        for metric in metrics {
            if !scopes.contains(&metric.scope) {
                scopes.push(metric.scope.clone());
            }
        }
        scopes
    }
}

fn default_catalog() -> Vec<MetricDescriptor> {
    use scopes::*;

    vec![
        MetricDescriptor::scalar(
            "steps",
            "com.google.step_count.delta",
            "Steps",
            "steps",
            ACTIVITY_READ,
        )
        .with_data_source("derived:com.google.step_count.delta:com.google.android.gms:estimated_steps")
        .with_aggregation(AggregationMode::DailySum),
        MetricDescriptor::scalar(
            "calories",
            "com.google.calories.expended",
            "Calories",
            "calories_kcal",
            ACTIVITY_READ,
        ),
        MetricDescriptor::scalar(
            "distance",
            "com.google.distance.delta",
            "Distance",
            "distance_m",
            LOCATION_READ,
        ),
        MetricDescriptor::composite(
            "heart_rate",
            "com.google.heart_rate.bpm",
            "HeartRate",
            vec![
                CompositeField::new("bpm_avg", 0),
                CompositeField::new("bpm_max", 1),
                CompositeField::new("bpm_min", 2),
            ],
            HEART_RATE_READ,
        ),
        MetricDescriptor::scalar("weight", "com.google.weight", "Weight", "weight_kg", BODY_READ),
        MetricDescriptor::scalar("height", "com.google.height", "Height", "height_m", BODY_READ),
        MetricDescriptor::scalar(
            "body_fat",
            "com.google.body.fat.percentage",
            "BodyFat",
            "body_fat_pct",
            BODY_READ,
        ),
        // Summary values are avg/max/min systolic, then avg/max/min diastolic
        MetricDescriptor::composite(
            "blood_pressure",
            "com.google.blood_pressure",
            "BloodPressure",
            vec![
                CompositeField::new("systolic_mmhg", 0),
                CompositeField::new("diastolic_mmhg", 3),
            ],
            BLOOD_PRESSURE_READ,
        ),
        MetricDescriptor::scalar(
            "blood_glucose",
            "com.google.blood_glucose",
            "BloodGlucose",
            "glucose_mmol_l",
            BLOOD_GLUCOSE_READ,
        ),
        MetricDescriptor::scalar(
            "oxygen_saturation",
            "com.google.oxygen_saturation",
            "OxygenSaturation",
            "spo2_pct",
            OXYGEN_SATURATION_READ,
        ),
        MetricDescriptor::scalar(
            "body_temperature",
            "com.google.body.temperature",
            "BodyTemperature",
            "temperature_c",
            BODY_TEMPERATURE_READ,
        ),
        MetricDescriptor::categorical(
            "activity",
            "com.google.activity.segment",
            "Activity",
            "activity_type",
            ACTIVITY_READ,
        ),
        MetricDescriptor::categorical(
            "sleep",
            "com.google.sleep.segment",
            "Sleep",
            "sleep_stage",
            SLEEP_READ,
        ),
    ]
}
