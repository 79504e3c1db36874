//! Text normalization and profession classification for scraped SACS
//! output.
//!
//! The registry renders professions with inconsistent accents, casing and
//! whitespace ("Médico  Cirujano", "MEDICO CIRUJANO"), so every comparison
//! runs on a canonical form. Classification decides whether a profession
//! belongs to human healthcare; the veterinary check runs before the
//! allow-list because "MÉDICO VETERINARIO" contains the physician token.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::models::verification::{PostgraduateRecord, ProfessionRecord};

/// Professions accepted as human healthcare. Compared against normalized
/// text, so the tokens carry no accents.
const HUMAN_HEALTH_PROFESSIONS: [&str; 9] = [
    "MEDICO",
    "CIRUJANO",
    "ODONTOLOGO",
    "BIOANALISTA",
    "ENFERMERO",
    "FARMACEUTICO",
    "FISIOTERAPEUTA",
    "NUTRICIONISTA",
    "PSICOLOGO",
];

const VETERINARY_TOKEN: &str = "VETERINARIO";

/// Canonical form: NFD-decompose, strip combining marks, collapse
/// whitespace runs, trim, upper-case.
pub fn normalize(text: &str) -> String {
    let stripped: String = text.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Whether `profession` names a human medical profession. The veterinary
/// exclusion takes precedence over every allow-list token.
pub fn is_human_medical(profession: &str) -> bool {
    let canonical = normalize(profession);
    if canonical.contains(VETERINARY_TOKEN) {
        return false;
    }
    HUMAN_HEALTH_PROFESSIONS
        .iter()
        .any(|token| canonical.contains(token))
}

pub fn is_veterinary(profession: &str) -> bool {
    normalize(profession).contains(VETERINARY_TOKEN)
}

/// Specialty shown to the platform: the most recent postgraduate degree
/// when one exists, otherwise a friendly mapping of the primary
/// profession.
pub fn display_specialty(
    professions: &[ProfessionRecord],
    postgraduates: &[PostgraduateRecord],
) -> String {
    if let Some(postgraduate) = postgraduates.first() {
        return postgraduate.degree.clone();
    }

    match professions.first() {
        Some(primary) => {
            let canonical = normalize(&primary.profession);
            if canonical.contains("CIRUJANO") {
                "MEDICINA GENERAL".to_string()
            } else if canonical.contains("ODONTOLOGO") {
                "ODONTOLOGÍA".to_string()
            } else if canonical.contains("BIOANALISTA") {
                "BIOANÁLISIS".to_string()
            } else if canonical.contains("ENFERMERO") {
                "ENFERMERÍA".to_string()
            } else if canonical.contains("FARMACEUTICO") {
                "FARMACIA".to_string()
            } else {
                primary.profession.clone()
            }
        }
        None => "NO ESPECIFICADA".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_accents_whitespace_and_case() {
        assert_eq!(normalize("Médico "), "MEDICO");
        assert_eq!(normalize("  médico   cirujano "), "MEDICO CIRUJANO");
        assert_eq!(normalize("ODONTÓLOGO"), "ODONTOLOGO");
        assert_eq!(normalize("Farmacéutico\tIndustrial"), "FARMACEUTICO INDUSTRIAL");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn veterinary_exclusion_precedes_inclusion() {
        assert!(!is_human_medical("MÉDICO VETERINARIO"));
        assert!(!is_human_medical("medico veterinario"));
        assert!(is_veterinary("Médico Veterinario"));
    }

    #[test]
    fn human_professions_are_accepted() {
        assert!(is_human_medical("MEDICO CIRUJANO"));
        assert!(is_human_medical("Odontólogo"));
        assert!(is_human_medical("LICENCIADO EN BIOANÁLISIS BIOANALISTA"));
        assert!(is_human_medical("PSICÓLOGO CLÍNICO"));
    }

    #[test]
    fn classification_is_insensitive_to_formatting() {
        assert_eq!(
            is_human_medical("  médico   cirujano "),
            is_human_medical("MEDICO CIRUJANO")
        );
    }

    #[test]
    fn unrelated_professions_are_rejected() {
        assert!(!is_human_medical("INGENIERO CIVIL"));
        assert!(!is_human_medical(""));
    }

    fn profession(name: &str) -> ProfessionRecord {
        ProfessionRecord {
            profession: name.to_string(),
            license: "MPPS-1".to_string(),
            registered_at: "01/01/2020".to_string(),
            tome: "1".to_string(),
            folio: "2".to_string(),
            has_postgraduate: false,
        }
    }

    #[test]
    fn specialty_prefers_postgraduate() {
        let postgrados = vec![PostgraduateRecord {
            degree: "CARDIOLOGÍA".to_string(),
            registered_at: "01/01/2022".to_string(),
            tome: "3".to_string(),
            folio: "4".to_string(),
        }];
        assert_eq!(
            display_specialty(&[profession("MÉDICO CIRUJANO")], &postgrados),
            "CARDIOLOGÍA"
        );
    }

    #[test]
    fn specialty_maps_primary_profession() {
        assert_eq!(
            display_specialty(&[profession("MÉDICO CIRUJANO")], &[]),
            "MEDICINA GENERAL"
        );
        assert_eq!(
            display_specialty(&[profession("ODONTÓLOGO")], &[]),
            "ODONTOLOGÍA"
        );
        assert_eq!(
            display_specialty(&[profession("NUTRICIONISTA")], &[]),
            "NUTRICIONISTA"
        );
        assert_eq!(display_specialty(&[], &[]), "NO ESPECIFICADA");
    }
}
