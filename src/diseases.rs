//! Registro de enfermedades: configuración por enfermedad (`diseases/<id>/config.json`),
//! procesadores que generan contexto a partir del dataset y el gestor que
//! orquesta detector + procesadores + cliente de IA.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::{
    dataset::{self, flag_set, is_positive, Dataset, AGE_COLUMN, GENDER_COLUMN, LABEL_COLUMN, POSITIVE_LABEL, SMOKING_COLUMN},
    detector::DiseaseDetector,
    llm::{AiClient, DEFAULT_MAX_TOKENS},
    statistics::{percentage, round1, round_to},
};

pub const LUNG_CANCER: &str = "lung_cancer";

const SYMPTOM_FEATURES: &[&str] = &[
    "COUGHING",
    "SHORTNESS_OF_BREATH",
    "CHEST_PAIN",
    "WHEEZING",
    "FATIGUE",
];

const NON_MEDICAL_RESPONSE: &str = "I specialize in medical information based on disease datasets. \n\n\
I can help you with:\n\
- Disease symptoms and risk factors\n\
- Medical dataset analysis\n\
- Health insights and statistics\n\n\
Please ask me about medical conditions or health-related topics.";

const NO_CONTEXT_RESPONSE: &str =
    "I can help with lung cancer information. Please ask about symptoms, risks, or dataset insights.";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiseaseConfig {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub disease_info: DiseaseInfoConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiseaseInfoConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

/// Lee `<dir>/<id>/config.json` para cada subdirectorio. Los ficheros
/// ilegibles se registran y se omiten.
pub fn load_configs(dir: &Path) -> BTreeMap<String, DiseaseConfig> {
    let mut configs = BTreeMap::new();
    if !dir.is_dir() {
        warn!("Directorio de enfermedades no encontrado: {}", dir.display());
        return configs;
    }

    let entries = WalkDir::new(dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == "config.json");

    for entry in entries {
        let Some(id) = entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_string())
        else {
            continue;
        };

        let parsed = fs::read_to_string(entry.path())
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<DiseaseConfig>(&raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(cfg) => {
                configs.insert(id, cfg);
            }
            Err(e) => error!("Error cargando la configuración de {id}: {e}"),
        }
    }
    configs
}

#[derive(Debug, Clone, Serialize)]
pub struct DiseaseInfo {
    pub name: String,
    pub description: String,
    pub total_records: usize,
    pub category: String,
    pub features: Vec<String>,
    pub data_quality: &'static str,
}

/// Procesador específico de una enfermedad.
pub trait DiseaseProcessor: Send + Sync {
    fn statistics(&self) -> Value;

    fn generate_insights(&self, query: &str) -> String;

    fn basic_info(&self) -> DiseaseInfo;
}

// ---------------------------------------------------------------------
// Cáncer de pulmón
// ---------------------------------------------------------------------

pub struct LungCancerProcessor {
    data: Arc<Dataset>,
    config: DiseaseConfig,
}

impl LungCancerProcessor {
    pub fn new(data: Arc<Dataset>, config: DiseaseConfig) -> Self {
        Self { data, config }
    }

    fn features(&self) -> Vec<&str> {
        self.data.feature_columns()
    }

    /// Columna como números si todos sus valores lo son.
    fn numeric_column(&self, column: &str) -> Option<Vec<f64>> {
        if !self.data.has_column(column) {
            return None;
        }
        self.data
            .records()
            .iter()
            .map(|r| dataset::value(r, column).and_then(|v| v.trim().parse::<f64>().ok()))
            .collect()
    }

    fn positive_records(&self) -> Vec<&crate::models::Record> {
        self.data.positives().collect()
    }

    fn smoking_insights(&self) -> String {
        if !self.data.has_column(SMOKING_COLUMN) {
            return "Smoking data not available in dataset.".to_string();
        }
        let total = self.data.len();
        let records = self.data.records();
        let smokers = records.iter().filter(|r| flag_set(r, SMOKING_COLUMN)).count();
        let smokers_pct = percentage(smokers, total).unwrap_or_default();

        if self.data.has_column(LABEL_COLUMN) {
            let positives = self.positive_records();
            let positive_smokers = positives.iter().filter(|r| flag_set(r, SMOKING_COLUMN)).count();
            if let Some(pct) = percentage(positive_smokers, positives.len()) {
                return format!(
                    "SMOKING ANALYSIS:\n• {smokers_pct}% of patients in dataset are smokers\n• {pct}% of cancer patients have smoking history\n• {positive_smokers} out of {} cancer cases involve smoking",
                    positives.len()
                );
            }
        }
        format!("SMOKING ANALYSIS:\n• {smokers_pct}% of patients in dataset are smokers ({smokers} out of {total})")
    }

    fn age_insights(&self) -> String {
        let Some(ages) = self.numeric_column(AGE_COLUMN).filter(|a| !a.is_empty()) else {
            return "Age data not available in dataset.".to_string();
        };
        let avg = round1(mean(&ages));
        let median = true_median(&ages);
        let range = format!("{}-{}", fmt_num(min(&ages)), fmt_num(max(&ages)));

        let positive_ages: Vec<f64> = self
            .data
            .records()
            .iter()
            .zip(&ages)
            .filter(|(r, _)| is_positive(r))
            .map(|(_, a)| *a)
            .collect();
        if !positive_ages.is_empty() {
            let positive_avg = round1(mean(&positive_ages));
            return format!(
                "AGE ANALYSIS:\n• Average age in dataset: {avg} years\n• Average age of cancer patients: {positive_avg} years\n• Age range: {range} years\n• Median age: {} years",
                fmt_num(median)
            );
        }
        format!(
            "AGE ANALYSIS:\n• Average age: {avg} years\n• Median age: {} years\n• Age range: {range} years",
            fmt_num(median)
        )
    }

    fn gender_insights(&self) -> String {
        if !self.data.has_column(GENDER_COLUMN) {
            return "Gender data not available in dataset.".to_string();
        }
        let total = self.data.len();
        let mut insights = String::from("GENDER ANALYSIS:\n");
        for (gender, count) in value_counts(self.data.records().iter(), GENDER_COLUMN) {
            let pct = percentage(count, total).unwrap_or_default();
            insights.push_str(&format!("• {gender}: {count} patients ({pct}%)\n"));
        }

        let positives = self.positive_records();
        if !positives.is_empty() {
            insights.push_str("Cancer cases by gender:\n");
            for (gender, count) in value_counts(positives.into_iter(), GENDER_COLUMN) {
                insights.push_str(&format!("• {gender}: {count} cases\n"));
            }
        }
        insights
    }

    fn symptom_insights(&self) -> String {
        let available: Vec<&str> = SYMPTOM_FEATURES
            .iter()
            .copied()
            .filter(|s| self.data.has_column(s))
            .collect();
        if available.is_empty() {
            return "Symptom data not fully available in dataset.".to_string();
        }

        let total = self.data.len();
        let mut insights = String::from("SYMPTOM ANALYSIS:\n");
        for symptom in available {
            let present = self.data.records().iter().filter(|r| flag_set(r, symptom)).count();
            let pct = percentage(present, total).unwrap_or_default();
            insights.push_str(&format!("• {}: {pct}% of patients\n", title_case(symptom)));
        }
        insights
    }

    fn general_statistics(&self) -> String {
        let total = self.data.len();
        let mut insights = format!(
            "DATASET STATISTICS:\n• Total records: {total}\n• Features analyzed: {}\n",
            self.features().len()
        );
        if self.data.has_column(LABEL_COLUMN) {
            let positives = self.data.positives().count();
            let rate = percentage(positives, total).unwrap_or_default();
            insights.push_str(&format!("• Cancer cases: {positives} ({rate}%)\n"));
            insights.push_str(&format!("• Non-cancer cases: {}\n", total - positives));
        }
        insights
    }

    fn general_insights(&self) -> String {
        format!(
            "LUNG CANCER DATASET:\n• {} patient records available\n• {} clinical features analyzed\n• Comprehensive symptom and risk factor data\n• Statistical analysis and correlations available",
            self.data.len(),
            self.features().len()
        )
    }

    fn target_distribution(&self) -> Value {
        if !self.data.has_column(LABEL_COLUMN) {
            return json!({});
        }
        let total = self.data.len();
        let positives = self.data.positives().count();
        let negatives = self
            .data
            .records()
            .iter()
            .filter(|r| dataset::value(r, LABEL_COLUMN) == Some("NO"))
            .count();
        json!({
            "cancer_cases": positives,
            "non_cancer_cases": negatives,
            "cancer_rate": round2(positives as f64 / total as f64 * 100.0),
            "total_cases": total,
        })
    }

    fn feature_analysis(&self) -> Value {
        let mut analysis = serde_json::Map::new();
        for feature in self.features() {
            let counts = value_counts(self.data.records().iter(), feature);
            let most_common: serde_json::Map<String, Value> = counts
                .iter()
                .take(5)
                .map(|(v, c)| (v.clone(), json!(c)))
                .collect();
            let data_type = if self.numeric_column(feature).is_some() { "numeric" } else { "text" };
            analysis.insert(
                feature.to_string(),
                json!({
                    "unique_values": counts.len(),
                    "most_common": most_common,
                    "data_type": data_type,
                }),
            );
        }
        Value::Object(analysis)
    }

    fn risk_factors(&self) -> Value {
        let positives = self.positive_records();
        if !self.data.has_column(LABEL_COLUMN) || positives.is_empty() {
            return json!({});
        }
        let mut factors = serde_json::Map::new();

        if self.data.has_column(SMOKING_COLUMN) {
            let with_factor = positives.iter().filter(|r| flag_set(r, SMOKING_COLUMN)).count();
            factors.insert(
                "SMOKING".into(),
                json!({
                    "cancer_cases_with_factor": with_factor,
                    "percentage": round2(with_factor as f64 / positives.len() as f64 * 100.0),
                    "description": "Smoking history",
                }),
            );
        }

        let positive_ages: Vec<f64> = positives.iter().filter_map(|r| dataset::age_of(r)).map(f64::from).collect();
        if !positive_ages.is_empty() {
            factors.insert(
                "AGE".into(),
                json!({
                    "average_age": round1(mean(&positive_ages)),
                    "age_range": format!("{}-{}", fmt_num(min(&positive_ages)), fmt_num(max(&positive_ages))),
                    "description": "Age factor in cancer cases",
                }),
            );
        }

        if self.data.has_column(GENDER_COLUMN) {
            let distribution: serde_json::Map<String, Value> = value_counts(positives.into_iter(), GENDER_COLUMN)
                .into_iter()
                .map(|(g, c)| (g, json!(c)))
                .collect();
            factors.insert(
                "GENDER".into(),
                json!({
                    "distribution": distribution,
                    "description": "Gender distribution in cancer cases",
                }),
            );
        }
        Value::Object(factors)
    }

    fn demographic_insights(&self) -> Value {
        let mut insights = serde_json::Map::new();
        if self.data.has_column(GENDER_COLUMN) {
            let distribution: serde_json::Map<String, Value> = value_counts(self.data.records().iter(), GENDER_COLUMN)
                .into_iter()
                .map(|(g, c)| (g, json!(c)))
                .collect();
            insights.insert("gender_distribution".into(), Value::Object(distribution));
        }
        if let Some(ages) = self.numeric_column(AGE_COLUMN).filter(|a| !a.is_empty()) {
            insights.insert(
                "age_statistics".into(),
                json!({
                    "mean_age": round1(mean(&ages)),
                    "median_age": true_median(&ages),
                    "age_range": format!("{}-{}", fmt_num(min(&ages)), fmt_num(max(&ages))),
                }),
            );
        }
        Value::Object(insights)
    }

    /// Correlación de Pearson de cada columna numérica con la etiqueta
    /// (YES = 1, NO = 0), ordenada por valor absoluto.
    fn correlations(&self) -> Vec<(String, f64)> {
        if !self.data.has_column(LABEL_COLUMN) {
            return Vec::new();
        }
        let labels: Vec<Option<f64>> = self
            .data
            .records()
            .iter()
            .map(|r| match dataset::value(r, LABEL_COLUMN) {
                Some(POSITIVE_LABEL) => Some(1.0),
                Some("NO") => Some(0.0),
                _ => None,
            })
            .collect();

        let mut correlations: Vec<(String, f64)> = self
            .features()
            .into_iter()
            .filter_map(|feature| {
                let column = self.numeric_column(feature)?;
                let pairs: Vec<(f64, f64)> = column
                    .into_iter()
                    .zip(&labels)
                    .filter_map(|(x, y)| y.map(|y| (x, y)))
                    .collect();
                pearson(&pairs).map(|r| (feature.to_string(), round3(r)))
            })
            .collect();
        correlations.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        correlations
    }

    fn correlation_insights(&self) -> Value {
        let sorted = self.correlations();
        let top: Vec<Value> = sorted
            .iter()
            .take(10)
            .map(|(f, r)| json!({ "feature": f, "correlation": r }))
            .collect();
        let strongest: Vec<&str> = sorted.iter().take(5).map(|(f, _)| f.as_str()).collect();
        json!({
            "feature_correlations": top,
            "strongest_predictors": strongest,
        })
    }
}

impl DiseaseProcessor for LungCancerProcessor {
    fn statistics(&self) -> Value {
        if self.data.is_empty() {
            return json!({ "error": "No data available" });
        }
        json!({
            "total_records": self.data.len(),
            "features": self.features().len(),
            "target_distribution": self.target_distribution(),
            "feature_analysis": self.feature_analysis(),
            "risk_factors": self.risk_factors(),
            "demographic_insights": self.demographic_insights(),
            "correlation_insights": self.correlation_insights(),
        })
    }

    fn generate_insights(&self, query: &str) -> String {
        if self.data.is_empty() {
            return "Dataset not available for analysis.".to_string();
        }
        let query = query.to_lowercase();
        if query.contains("smoking") {
            self.smoking_insights()
        } else if query.contains("age") {
            self.age_insights()
        } else if query.contains("gender") {
            self.gender_insights()
        } else if query.contains("symptom") {
            self.symptom_insights()
        } else if query.contains("statistic") || query.contains("data") {
            self.general_statistics()
        } else {
            self.general_insights()
        }
    }

    fn basic_info(&self) -> DiseaseInfo {
        let info = &self.config.disease_info;
        DiseaseInfo {
            name: info.name.clone().unwrap_or_else(|| "Lung Cancer Analysis".to_string()),
            description: info.description.clone().unwrap_or_else(|| {
                "Comprehensive lung cancer dataset with patient symptoms, risk factors, and outcomes".to_string()
            }),
            total_records: self.data.len(),
            category: info.category.clone().unwrap_or_else(|| "Oncology".to_string()),
            features: self.features().into_iter().map(str::to_string).collect(),
            data_quality: if self.data.is_empty() { "unavailable" } else { "complete" },
        }
    }
}

// --- Utilidades numéricas ---

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn min(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn max(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Mediana estadística (promedia los dos centrales en longitud par).
fn true_median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut vx, mut vy) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    let r = cov / (vx.sqrt() * vy.sqrt());
    r.is_finite().then_some(r)
}

fn round2(v: f64) -> f64 {
    round_to(v, 2)
}

fn round3(v: f64) -> f64 {
    round_to(v, 3)
}

/// Enteros sin decimales, el resto con uno.
fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v:.1}")
    }
}

fn title_case(column: &str) -> String {
    column
        .split('_')
        .map(|w| {
            let lower = w.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Frecuencia de cada valor, de más a menos frecuente.
fn value_counts<'a>(
    records: impl Iterator<Item = &'a crate::models::Record>,
    column: &str,
) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in records.filter_map(|r| dataset::value(r, column)) {
        *counts.entry(value).or_default() += 1;
    }
    let mut counts: Vec<(String, usize)> = counts.into_iter().map(|(v, c)| (v.to_string(), c)).collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}

// ---------------------------------------------------------------------
// Gestor de enfermedades
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub query: String,
    pub detected_diseases: Vec<String>,
    pub confidences: BTreeMap<String, f64>,
    pub ai_response: String,
    pub metadata: Value,
}

pub struct DiseaseManager {
    processors: BTreeMap<String, Box<dyn DiseaseProcessor>>,
    detector: DiseaseDetector,
    ai: Arc<AiClient>,
}

impl DiseaseManager {
    /// Instancia un procesador por cada enfermedad habilitada que se conozca.
    pub fn new(
        enabled: &[String],
        configs: &BTreeMap<String, DiseaseConfig>,
        data: Arc<Dataset>,
        detector: DiseaseDetector,
        ai: Arc<AiClient>,
    ) -> Self {
        let mut processors: BTreeMap<String, Box<dyn DiseaseProcessor>> = BTreeMap::new();
        for id in enabled {
            let config = configs.get(id).cloned().unwrap_or_default();
            match id.as_str() {
                LUNG_CANCER => {
                    processors.insert(id.clone(), Box::new(LungCancerProcessor::new(data.clone(), config)));
                    info!("✅ Enfermedad cargada: {id}");
                }
                other => error!("❌ No hay procesador para la enfermedad '{other}'"),
            }
        }
        Self {
            processors,
            detector,
            ai,
        }
    }

    pub fn available_diseases(&self) -> BTreeMap<String, DiseaseInfo> {
        self.processors
            .iter()
            .map(|(id, p)| (id.clone(), p.basic_info()))
            .collect()
    }

    pub fn disease_statistics(&self, id: &str) -> Option<Value> {
        self.processors.get(id).map(|p| p.statistics())
    }

    /// Detecta las enfermedades de la consulta, reúne su contexto y, si hay
    /// IA disponible, genera la respuesta con ese contexto.
    pub async fn process_query(&self, query: &str) -> QueryOutcome {
        if !self.detector.is_medical(query) {
            return QueryOutcome {
                query: "non_medical".to_string(),
                detected_diseases: Vec::new(),
                confidences: BTreeMap::new(),
                ai_response: NON_MEDICAL_RESPONSE.to_string(),
                metadata: json!({ "response_type": "redirect" }),
            };
        }

        let detected = self.detector.detect_topics(query);
        let confidences = detected
            .iter()
            .map(|d| (d.clone(), self.detector.confidence(query, d)))
            .collect();

        let context: Vec<(&str, String)> = detected
            .iter()
            .filter_map(|d| {
                self.processors
                    .get(d)
                    .map(|p| (d.as_str(), p.generate_insights(query)))
            })
            .collect();

        let ai_response = if context.is_empty() {
            NO_CONTEXT_RESPONSE.to_string()
        } else if self.ai.is_available() {
            self.ai
                .generate(&disease_prompt(query, &context), DEFAULT_MAX_TOKENS)
                .await
        } else {
            context
                .iter()
                .map(|(_, insight)| insight.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        };

        QueryOutcome {
            query: query.to_string(),
            detected_diseases: detected,
            confidences,
            ai_response,
            metadata: json!({ "total_processors": self.processors.len() }),
        }
    }
}

fn disease_prompt(query: &str, context: &[(&str, String)]) -> String {
    let mut prompt = String::from(
        "You are a medical AI assistant with access to disease datasets.\n\nAVAILABLE DATA:\n",
    );
    for (disease, insight) in context {
        prompt.push_str(&format!("\n{}:\n{insight}\n", disease.to_uppercase()));
    }
    prompt.push_str(&format!(
        "\nINSTRUCTIONS:\n\
         1. Provide evidence-based information from the dataset\n\
         2. Include relevant statistics\n\
         3. Always recommend consulting healthcare professionals\n\
         4. Be clear about limitations\n\n\
         USER QUESTION: {query}\n\n\
         Provide a helpful medical response:"
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, FileSettings};
    use crate::dataset::fixtures;

    fn processor() -> LungCancerProcessor {
        LungCancerProcessor::new(Arc::new(fixtures::sample()), DiseaseConfig::default())
    }

    fn offline_ai() -> Arc<AiClient> {
        let cfg = AppConfig::from_parts(FileSettings::default(), |_| None).unwrap();
        Arc::new(AiClient::from_config(&cfg).unwrap())
    }

    #[test]
    fn loads_configs_from_disease_directories() {
        let dir = tempfile::tempdir().unwrap();
        let lung = dir.path().join("lung_cancer");
        fs::create_dir_all(&lung).unwrap();
        fs::write(
            lung.join("config.json"),
            r#"{"keywords": ["lung", "cough"], "disease_info": {"name": "Lung", "category": "Oncology"}}"#,
        )
        .unwrap();
        let broken = dir.path().join("broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("config.json"), "{not json").unwrap();

        let configs = load_configs(dir.path());
        assert_eq!(configs.len(), 1);
        assert_eq!(configs["lung_cancer"].keywords, vec!["lung", "cough"]);
        assert_eq!(configs["lung_cancer"].disease_info.name.as_deref(), Some("Lung"));
    }

    #[test]
    fn insights_follow_query_keywords() {
        let p = processor();
        assert!(p.generate_insights("Smoking risk?").starts_with("SMOKING ANALYSIS"));
        assert!(p.generate_insights("age of patients").contains("Median age: 55 years"));
        assert!(p.generate_insights("gender split").contains("• M: 2 patients (50%)"));
        assert!(p.generate_insights("symptom list").contains("Chest Pain: 50% of patients"));
        assert!(p.generate_insights("show statistics").contains("Cancer cases: 3 (75%)"));
        assert!(p.generate_insights("hello").starts_with("LUNG CANCER DATASET"));
    }

    #[test]
    fn empty_dataset_processor_reports_unavailable() {
        let p = LungCancerProcessor::new(Arc::new(Dataset::default()), DiseaseConfig::default());
        assert_eq!(p.generate_insights("smoking"), "Dataset not available for analysis.");
        assert_eq!(p.statistics()["error"], "No data available");
        assert_eq!(p.basic_info().data_quality, "unavailable");
    }

    #[test]
    fn structured_statistics() {
        let stats = processor().statistics();
        assert_eq!(stats["total_records"], 4);
        assert_eq!(stats["target_distribution"]["cancer_cases"], 3);
        assert_eq!(stats["target_distribution"]["cancer_rate"], 75.0);
        assert_eq!(stats["risk_factors"]["SMOKING"]["percentage"], 100.0);
        assert_eq!(stats["demographic_insights"]["age_statistics"]["median_age"], 55.0);
        assert_eq!(stats["feature_analysis"]["GENDER"]["unique_values"], 2);

        let strongest = stats["correlation_insights"]["strongest_predictors"].as_array().unwrap();
        assert_eq!(strongest[0], "SMOKING");
    }

    #[test]
    fn pearson_handles_constant_columns() {
        assert_eq!(pearson(&[(1.0, 0.0), (1.0, 1.0)]), None);
        let r = pearson(&[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]).unwrap();
        assert!((r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn structured_rounding_breaks_ties_to_even() {
        assert_eq!(round2(0.125), 0.12);
        assert_eq!(round2(6.25), 6.25);
        assert_eq!(round3(0.0625), 0.062);
        assert_eq!(round3(-0.0625), -0.062);
    }

    #[test]
    fn title_case_formats_column_names() {
        assert_eq!(title_case("SHORTNESS_OF_BREATH"), "Shortness Of Breath");
    }

    #[tokio::test]
    async fn non_medical_queries_are_redirected() {
        let data = Arc::new(fixtures::sample());
        let manager = DiseaseManager::new(
            &[LUNG_CANCER.to_string(), "unknown".to_string()],
            &BTreeMap::new(),
            data,
            DiseaseDetector::default(),
            offline_ai(),
        );
        assert_eq!(manager.available_diseases().len(), 1);

        let outcome = manager.process_query("what's the weather today").await;
        assert_eq!(outcome.query, "non_medical");
        assert!(outcome.detected_diseases.is_empty());
    }

    #[tokio::test]
    async fn medical_query_uses_processor_insights_without_ai() {
        let manager = DiseaseManager::new(
            &[LUNG_CANCER.to_string()],
            &BTreeMap::new(),
            Arc::new(fixtures::sample()),
            DiseaseDetector::default(),
            offline_ai(),
        );
        let outcome = manager.process_query("Does smoking cause lung cancer?").await;
        assert_eq!(outcome.detected_diseases, vec![LUNG_CANCER]);
        assert!(outcome.confidences[LUNG_CANCER] > 0.0);
        assert!(outcome.ai_response.starts_with("SMOKING ANALYSIS"));
        assert!(manager.disease_statistics(LUNG_CANCER).is_some());
        assert!(manager.disease_statistics("unknown").is_none());
    }

    #[test]
    fn disease_prompt_lists_context_per_disease() {
        let prompt = disease_prompt("q?", &[("lung_cancer", "ctx".to_string())]);
        assert!(prompt.contains("LUNG_CANCER:\nctx"));
        assert!(prompt.ends_with("USER QUESTION: q?\n\nProvide a helpful medical response:"));
    }
}
