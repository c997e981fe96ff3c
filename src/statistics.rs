//! Motor de estadísticas descriptivas sobre el dataset.
//!
//! El tema se infiere del texto de la consulta con una tabla de reglas
//! ordenada (la primera que coincide gana). Cada tema produce un
//! `StatisticsResult` que después se renderiza como texto.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::dataset::{
    age_of, flag_set, is_positive, value, Dataset, FEMALE, GENDER_COLUMN, MALE, SMOKING_COLUMN,
};

pub const DATASET_UNAVAILABLE: &str =
    "Medical dataset not available. Please ensure the dataset is properly loaded.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Smoking,
    Age,
    Overview,
    Catalog,
}

/// Reglas evaluadas en orden: tema → palabras clave (subcadena, minúsculas).
const TOPIC_RULES: &[(Topic, &[&str])] = &[
    (Topic::Smoking, &["smoking", "smoke"]),
    (Topic::Age, &["age"]),
    (Topic::Overview, &["statistic", "overview", "summary"]),
];

impl Topic {
    pub fn infer(query: &str) -> Self {
        let query = query.to_lowercase();
        TOPIC_RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| query.contains(k)))
            .map(|(topic, _)| *topic)
            .unwrap_or(Topic::Catalog)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum StatsError {
    #[error("no positive cases in dataset to compare against")]
    NoPositiveCases,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmokingStats {
    pub total: usize,
    pub smokers: usize,
    pub smokers_pct: f64,
    pub positives: usize,
    pub positive_smokers: usize,
    pub positive_smokers_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgeSummary {
    pub mean: f64,
    pub min: u32,
    pub max: u32,
    pub median: u32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgeStats {
    pub all: AgeSummary,
    pub positive: Option<AgeSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverviewStats {
    pub total: usize,
    pub positives: usize,
    pub positives_pct: f64,
    pub negatives: usize,
    pub negatives_pct: f64,
    pub male: usize,
    pub male_pct: f64,
    pub female: usize,
    pub female_pct: f64,
}

/// Resultado de una consulta de estadísticas, etiquetado por tema.
#[derive(Debug, Clone, PartialEq)]
pub enum StatisticsResult {
    Unavailable,
    Smoking(SmokingStats),
    Age(Option<AgeStats>),
    Overview(OverviewStats),
    Catalog { total: usize, positives: usize },
}

/// Redondeo a `decimals` cifras sobre el valor binario exacto, con empates
/// al par (6.25 → 6.2). El formateo de `f64` ya redondea así.
pub fn round_to(value: f64, decimals: usize) -> f64 {
    format!("{value:.decimals$}").parse().unwrap_or(value)
}

pub fn round1(value: f64) -> f64 {
    round_to(value, 1)
}

/// `round(numerator / denominator * 100, 1)`; `None` si el denominador es 0.
pub fn percentage(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| round1(numerator as f64 / denominator as f64 * 100.0))
}

/// Mediana por índice: `sorted[len / 2]`, sin promediar los dos centrales.
pub fn index_median(values: &[u32]) -> Option<u32> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted.get(sorted.len() / 2).copied()
}

fn summarize_ages(ages: &[u32]) -> Option<AgeSummary> {
    let median = index_median(ages)?;
    let sum: u64 = ages.iter().map(|&a| u64::from(a)).sum();
    Some(AgeSummary {
        mean: sum as f64 / ages.len() as f64,
        min: *ages.iter().min()?,
        max: *ages.iter().max()?,
        median,
        count: ages.len(),
    })
}

/// Calcula las estadísticas del tema indicado.
pub fn compute(dataset: &Dataset, topic: Topic) -> Result<StatisticsResult, StatsError> {
    if dataset.is_empty() {
        return Ok(StatisticsResult::Unavailable);
    }
    let records = dataset.records();
    let total = records.len();
    // `total > 0` garantizado a partir de aquí.
    let pct = |n: usize| percentage(n, total).unwrap_or_default();

    let result = match topic {
        Topic::Smoking => {
            let smokers = records.iter().filter(|r| flag_set(r, SMOKING_COLUMN)).count();
            let positives = dataset.positives().count();
            let positive_smokers = dataset
                .positives()
                .filter(|r| flag_set(r, SMOKING_COLUMN))
                .count();
            let positive_smokers_pct =
                percentage(positive_smokers, positives).ok_or(StatsError::NoPositiveCases)?;
            StatisticsResult::Smoking(SmokingStats {
                total,
                smokers,
                smokers_pct: pct(smokers),
                positives,
                positive_smokers,
                positive_smokers_pct,
            })
        }
        Topic::Age => {
            let ages: Vec<u32> = records.iter().filter_map(age_of).collect();
            let positive_ages: Vec<u32> = dataset.positives().filter_map(age_of).collect();
            StatisticsResult::Age(summarize_ages(&ages).map(|all| AgeStats {
                all,
                positive: summarize_ages(&positive_ages),
            }))
        }
        Topic::Overview => {
            let positives = records.iter().filter(|r| is_positive(r)).count();
            let negatives = total - positives;
            let gender_count = |code: &str| {
                records
                    .iter()
                    .filter(|r| value(r, GENDER_COLUMN) == Some(code))
                    .count()
            };
            let male = gender_count(MALE);
            let female = gender_count(FEMALE);
            StatisticsResult::Overview(OverviewStats {
                total,
                positives,
                positives_pct: pct(positives),
                negatives,
                negatives_pct: pct(negatives),
                male,
                male_pct: pct(male),
                female,
                female_pct: pct(female),
            })
        }
        Topic::Catalog => StatisticsResult::Catalog {
            total,
            positives: dataset.positives().count(),
        },
    };
    Ok(result)
}

/// Punto de entrada del motor: tema inferido, cálculo y texto. Nunca falla.
pub fn summarize(dataset: &Dataset, query: &str) -> String {
    let topic = Topic::infer(query);
    match compute(dataset, topic) {
        Ok(result) => result.to_string(),
        Err(e) => {
            warn!("Fallo calculando estadísticas ({topic:?}): {e}");
            format!("Error analyzing dataset: {e}")
        }
    }
}

/// Entero con separador de miles (`1,234`).
pub fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

impl fmt::Display for StatisticsResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => f.write_str(DATASET_UNAVAILABLE),
            Self::Smoking(s) => write!(
                f,
                "**SMOKING ANALYSIS FROM MEDICAL DATASET**\n\n\
                 📊 **Dataset Overview:**\n\
                 • Total patients analyzed: {total}\n\
                 • Patients with smoking history: {smokers} ({smokers_pct:.1}%)\n\
                 • Patients without smoking history: {non_smokers}\n\n\
                 🎯 **Cancer Correlation:**\n\
                 • Total cancer cases: {positives}\n\
                 • Cancer cases with smoking history: {positive_smokers}\n\
                 • **{pos_pct:.1}% of cancer patients have smoking history**\n\n\
                 💡 **Key Insight:** Smoking appears in {pos_pct:.1}% of cancer cases in our dataset.",
                total = thousands(s.total),
                smokers = thousands(s.smokers),
                smokers_pct = s.smokers_pct,
                non_smokers = thousands(s.total - s.smokers),
                positives = thousands(s.positives),
                positive_smokers = thousands(s.positive_smokers),
                pos_pct = s.positive_smokers_pct,
            ),
            Self::Age(None) => f.write_str("Age data not available in dataset."),
            Self::Age(Some(a)) => {
                write!(
                    f,
                    "**AGE ANALYSIS FROM MEDICAL DATASET**\n\n\
                     📊 **Age Demographics:**\n\
                     • Average age of all patients: {:.1} years\n\
                     • Age range: {} - {} years\n\
                     • Median age: {} years",
                    a.all.mean, a.all.min, a.all.max, a.all.median,
                )?;
                if let Some(p) = &a.positive {
                    let diff = (p.mean - a.all.mean).abs();
                    let direction = if p.mean > a.all.mean { "older" } else { "younger" };
                    write!(
                        f,
                        "\n\n🎯 **Cancer Age Analysis:**\n\
                         • Average age of cancer patients: {:.1} years\n\
                         • Median age of cancer patients: {} years\n\
                         • Cancer cases analyzed: {}\n\n\
                         💡 **Key Insight:** Cancer patients are on average {:.1} years {} than the general patient population.",
                        p.mean,
                        p.median,
                        thousands(p.count),
                        diff,
                        direction,
                    )?;
                }
                Ok(())
            }
            Self::Overview(o) => write!(
                f,
                "**MEDICAL DATASET STATISTICS**\n\n\
                 📊 **Dataset Overview:**\n\
                 • Total medical records: {}\n\
                 • Cancer cases: {} ({:.1}%)\n\
                 • Non-cancer cases: {} ({:.1}%)\n\n\
                 👥 **Demographics:**\n\
                 • Male patients: {} ({:.1}%)\n\
                 • Female patients: {} ({:.1}%)",
                thousands(o.total),
                thousands(o.positives),
                o.positives_pct,
                thousands(o.negatives),
                o.negatives_pct,
                thousands(o.male),
                o.male_pct,
                thousands(o.female),
                o.female_pct,
            ),
            Self::Catalog { total, positives } => write!(
                f,
                "**MEDICAL DATASET AVAILABLE**\n\n\
                 📊 I have access to {} medical records including {} cancer cases.\n\n\
                 🔍 **You can ask me about:**\n\
                 • Smoking patterns and cancer correlation\n\
                 • Age demographics and cancer risk\n\
                 • Gender distribution in cancer cases\n\
                 • Symptom prevalence and analysis\n\
                 • Statistical overviews and insights\n\n\
                 💡 **Try asking:** \"How does smoking affect cancer risk?\" or \"What are the age patterns in cancer patients?\"",
                thousands(*total),
                thousands(*positives),
            ),
        }
    }
}
