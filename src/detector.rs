//! Clasificador por palabras clave y expresiones regulares que decide si una
//! consulta es médica y a qué enfermedades se refiere.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::diseases::DiseaseConfig;

/// Lista por defecto cuando no hay ninguna enfermedad configurada.
const FALLBACK_LUNG_CANCER_KEYWORDS: &[&str] = &[
    "lung cancer", "pulmonary cancer", "lung tumor", "lung mass",
    "cough", "coughing", "shortness of breath", "chest pain",
    "smoking", "tobacco", "wheezing", "fatigue", "weight loss",
    "lung", "respiratory", "breathing", "bronchial",
];

const MEDICAL_TERMS: &[&str] = &[
    "symptoms", "diagnosis", "treatment", "medication", "disease",
    "condition", "syndrome", "disorder", "infection", "virus",
    "bacteria", "pain", "fever", "inflammation", "chronic",
    "acute", "severe", "mild", "moderate", "health", "medical",
    "doctor", "physician", "hospital", "clinic", "patient",
    "risk factors", "prevention", "cure", "therapy", "surgery",
    "blood test", "x-ray", "scan", "biopsy", "cancer", "tumor",
    "benign", "malignant", "metastasis", "stage",
];

static MEDICAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b(what|how|why|when|where)\s+(is|are|does|do|can|will|should)\s+.*\b(disease|condition|symptom|treatment|medication)\b",
        r"\b(symptoms|signs)\s+of\b",
        r"\bcaused?\s+by\b",
        r"\b(risk|factors|prevention|cure|treatment|therapy)\b",
        r"\b(pain|ache|hurt|sore)\b",
        r"\b(doctor|physician|medical|health)\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

#[derive(Debug, Clone)]
pub struct DiseaseDetector {
    disease_keywords: BTreeMap<String, Vec<String>>,
    medical_terms: HashSet<&'static str>,
}

impl DiseaseDetector {
    /// Construye el detector a partir de las configuraciones de enfermedad.
    /// Si ninguna aporta palabras clave se usa la lista de cáncer de pulmón.
    pub fn from_configs(configs: &BTreeMap<String, DiseaseConfig>) -> Self {
        let mut detector = Self {
            disease_keywords: BTreeMap::new(),
            medical_terms: MEDICAL_TERMS.iter().copied().collect(),
        };
        for (id, cfg) in configs {
            detector.add_disease_keywords(id, cfg.keywords.clone());
        }

        if detector.disease_keywords.is_empty() {
            detector.add_disease_keywords(
                "lung_cancer",
                FALLBACK_LUNG_CANCER_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            );
        }
        detector
    }

    pub fn is_medical(&self, query: &str) -> bool {
        let query = query.to_lowercase();

        if self.medical_terms.iter().any(|term| query.contains(term)) {
            return true;
        }

        if self
            .disease_keywords
            .values()
            .flatten()
            .any(|k| query.contains(&k.to_lowercase()))
        {
            return true;
        }

        MEDICAL_PATTERNS.iter().any(|re| re.is_match(&query))
    }

    /// Enfermedades mencionadas en la consulta, en orden de identificador.
    ///
    /// Una consulta médica que no menciona ninguna enfermedad concreta se
    /// asigna a todas las conocidas.
    pub fn detect_topics(&self, query: &str) -> Vec<String> {
        let lowered = query.to_lowercase();
        let detected: Vec<String> = self
            .disease_keywords
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| lowered.contains(&k.to_lowercase())))
            .map(|(id, _)| id.clone())
            .collect();

        if detected.is_empty() && self.is_medical(query) {
            return self.available_diseases();
        }
        detected
    }

    /// Palabras clave coincidentes / total de palabras clave, con tope 1.0.
    pub fn confidence(&self, query: &str, disease: &str) -> f64 {
        let Some(keywords) = self.disease_keywords.get(disease) else {
            return 0.0;
        };
        if keywords.is_empty() {
            return 0.0;
        }
        let lowered = query.to_lowercase();
        let matches = keywords
            .iter()
            .filter(|k| lowered.contains(&k.to_lowercase()))
            .count();
        (matches as f64 / keywords.len() as f64).min(1.0)
    }

    pub fn add_disease_keywords(&mut self, disease: &str, keywords: Vec<String>) {
        self.disease_keywords.insert(disease.to_string(), keywords);
    }

    pub fn available_diseases(&self) -> Vec<String> {
        self.disease_keywords.keys().cloned().collect()
    }
}

impl Default for DiseaseDetector {
    fn default() -> Self {
        Self::from_configs(&BTreeMap::new())
    }
}
