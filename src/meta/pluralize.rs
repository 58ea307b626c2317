//! Spanish pluralization for generated operation and field names.
//!
//! Plural operation names (`listProvincias`, `deleteInmuebles`) are derived
//! from the singular entity name with linguistic rules rather than a blind
//! `+s` suffix. Irregular forms are table-driven so new cases are a one-line
//! addition, not a code change.

/// Words whose plural form is identical to the singular.
const INVARIANT_PLURALS: &[&str] = &[
    "crisis",
    "tesis",
    "sintesis",
    "analisis",
    "diocesis",
    "parentesis",
    "hipotesis",
    "enfasis",
];

/// Specific singular → plural overrides for words the rules below get wrong.
const PLURAL_EXCEPTIONS: &[(&str, &str)] = &[("caracter", "caracteres"), ("regimen", "regimenes")];

/// Pluralize a Spanish word, preserving the capitalization of the first
/// letter (entity names are PascalCase, column names lowercase).
///
/// Rules, in priority order:
/// 1. explicit exceptions table
/// 2. invariant words (and compounds ending in one): unchanged
/// 3. `-cion` / `-sion` → `-ciones` / `-siones`
/// 4. `-z` → `-ces`
/// 5. ends in a vowel → `+s`
/// 6. ends in a stressed vowel (`í`, `ú`) → `+es`
/// 7. ends in a consonant other than `s`/`x` → `+es`
/// 8. already ends in `s` → unchanged
pub fn pluralize(word: &str) -> String {
    let lower = word.to_lowercase();
    let plural = pluralize_lower(&lower);
    restore_case(word, &plural)
}

fn pluralize_lower(word: &str) -> String {
    if let Some((_, plural)) = PLURAL_EXCEPTIONS.iter().find(|(s, _)| *s == word) {
        return (*plural).to_string();
    }

    if INVARIANT_PLURALS.iter().any(|inv| word.ends_with(inv)) {
        return word.to_string();
    }

    if word.ends_with("cion") || word.ends_with("sion") {
        return format!("{word}es");
    }

    if let Some(stem) = word.strip_suffix('z') {
        return format!("{stem}ces");
    }

    let Some(last) = word.chars().last() else {
        return word.to_string();
    };

    if matches!(last, 'a' | 'e' | 'i' | 'o' | 'u') {
        return format!("{word}s");
    }

    if matches!(last, 'í' | 'ú') {
        return format!("{word}es");
    }

    if last == 's' || last == 'x' {
        return word.to_string();
    }

    format!("{word}es")
}

/// Re-apply the leading capitalization of `original` onto `plural`.
fn restore_case(original: &str, plural: &str) -> String {
    match original.chars().next() {
        Some(first) if first.is_uppercase() => {
            let mut chars = plural.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => plural.to_string(),
            }
        }
        _ => plural.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_vowel_endings() {
        assert_eq!(pluralize("provincia"), "provincias");
        assert_eq!(pluralize("inmueble"), "inmuebles");
        assert_eq!(pluralize("localidad"), "localidades");
    }

    #[test]
    fn cion_sion_endings() {
        assert_eq!(pluralize("administracion"), "administraciones");
        assert_eq!(pluralize("actuacion"), "actuaciones");
        assert_eq!(pluralize("transmision"), "transmisiones");
    }

    #[test]
    fn invariant_words() {
        assert_eq!(pluralize("diocesis"), "diocesis");
        assert_eq!(pluralize("crisis"), "crisis");
        assert_eq!(pluralize("analisis"), "analisis");
    }

    #[test]
    fn z_becomes_ces() {
        assert_eq!(pluralize("vez"), "veces");
        assert_eq!(pluralize("luz"), "luces");
    }

    #[test]
    fn exceptions_table() {
        assert_eq!(pluralize("caracter"), "caracteres");
        assert_eq!(pluralize("regimen"), "regimenes");
    }

    #[test]
    fn preserves_pascal_case() {
        assert_eq!(pluralize("Administracion"), "Administraciones");
        assert_eq!(pluralize("Diocesis"), "Diocesis");
    }
}
