/*!
 * Tests for language utility functions
 */

use texwai::app_config::LatexEngine;
use texwai::language_utils::{
    get_language_name, language_codes_match, normalize_code, validate_language_code, ScriptProfile, TargetScript,
};

#[test]
fn test_validateLanguageCode_withValidAndInvalidCodes_shouldAcceptOnlyIso() {
    for code in ["en", "fr", "eng", "fra", "fre", "ger", " EN "] {
        assert!(validate_language_code(code).is_ok(), "{}", code);
    }
    for code in ["xyz", "123", "e", ""] {
        assert!(validate_language_code(code).is_err(), "{}", code);
    }
}

#[test]
fn test_normalizeCode_shouldPreferTwoLetterCodes() {
    assert_eq!(normalize_code("eng").unwrap(), "en");
    assert_eq!(normalize_code("fre").unwrap(), "fr");
    assert_eq!(normalize_code("ZH").unwrap(), "zh");
}

#[test]
fn test_languageCodesMatch_acrossFormats_shouldMatch() {
    assert!(language_codes_match("en", "eng"));
    assert!(language_codes_match("ger", "de"));
    assert!(!language_codes_match("en", "fr"));
    assert!(!language_codes_match("en", "invalid"));
}

#[test]
fn test_getLanguageName_shouldReturnEnglishName() {
    assert_eq!(get_language_name("ja").unwrap(), "Japanese");
    assert!(get_language_name("zz").is_err());
}

#[test]
fn test_scriptProfile_forEachScript_shouldPickEngine() {
    assert_eq!(ScriptProfile::for_language("ja").engine, LatexEngine::Xelatex);
    assert_eq!(ScriptProfile::for_language("ko").script, TargetScript::Korean);
    assert_eq!(ScriptProfile::for_language("de").engine, LatexEngine::Pdf);
    assert_eq!(
        ScriptProfile::for_language("ru").usepackage_lines(),
        vec!["\\usepackage[T2A]{fontenc}", "\\usepackage[russian]{babel}"]
    );
}
