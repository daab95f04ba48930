//! Deterministic artifact and repository names.
//!
//! Every artifact a run produces is named from the configured base name and
//! an output tag, or from the checkpoint identifier. Re-running with the same
//! configuration therefore lands on the same paths, which is what makes the
//! existence checks in the pipeline usable as a cache.

/// Substring that marks an importance-matrix quantization type (`IQ3_XS`, ...).
pub const CALIBRATION_MARKER: &str = "IQ";

/// File name of a GGUF artifact: `{base}-GGUF-{tag}.gguf`.
pub fn create_model_name(model_base: &str, output_type: &str) -> String {
    format!("{model_base}-GGUF-{output_type}.gguf")
}

/// Short model name: the segment after the last `/` of a Hub identifier.
pub fn repo_short_name(repo_id: &str) -> &str {
    repo_id.rsplit('/').next().unwrap_or(repo_id)
}

/// File name of the importance matrix for a checkpoint: `imatrix_{name}.dat`.
pub fn imatrix_file_name(repo_id: &str) -> String {
    format!("imatrix_{}.dat", repo_short_name(repo_id))
}

/// Whether a single output tag needs an importance matrix.
pub fn needs_calibration(output_type: &str) -> bool {
    output_type.contains(CALIBRATION_MARKER)
}

/// Whether any of the requested output tags needs an importance matrix.
pub fn any_needs_calibration<S: AsRef<str>>(output_types: &[S]) -> bool {
    output_types.iter().any(|t| needs_calibration(t.as_ref()))
}

/// Hub repository that receives the artifacts: `{account}/{base}-GGUF`.
pub fn upload_repo_id(account: &str, model_base: &str) -> String {
    format!("{account}/{model_base}-GGUF")
}

/// Glob patterns selecting the files a run uploads from the output directory.
///
/// Names are escaped, so only the `*` before `.gguf` is a wildcard.
pub fn upload_allow_patterns(model_base: &str, repo_id: &str) -> Vec<String> {
    vec![
        format!("{}-GGUF-*.gguf", glob::Pattern::escape(model_base)),
        glob::Pattern::escape(&imatrix_file_name(repo_id)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_model_name() {
        assert_eq!(create_model_name("Llama3", "Q4_0"), "Llama3-GGUF-Q4_0.gguf");
        assert_eq!(create_model_name("Llama3", "bf16"), "Llama3-GGUF-bf16.gguf");
    }

    #[test]
    fn test_imatrix_file_name_uses_short_name() {
        assert_eq!(
            imatrix_file_name("meta-llama/Meta-Llama-3-8B"),
            "imatrix_Meta-Llama-3-8B.dat"
        );
        assert_eq!(imatrix_file_name("local-model"), "imatrix_local-model.dat");
    }

    #[test]
    fn test_any_needs_calibration() {
        assert!(any_needs_calibration(&["Q4_0", "IQ3_XS"]));
        assert!(!any_needs_calibration(&["Q4_0", "Q8_0"]));
        assert!(!any_needs_calibration::<&str>(&[]));
    }

    #[test]
    fn test_calibration_marker_is_case_sensitive() {
        assert!(needs_calibration("IQ4_NL"));
        assert!(!needs_calibration("iq4_nl"));
        assert!(!needs_calibration("Q4_K_M"));
    }

    #[test]
    fn test_upload_names() {
        assert_eq!(upload_repo_id("alice", "Llama3"), "alice/Llama3-GGUF");
        assert_eq!(
            upload_allow_patterns("Llama3", "meta-llama/Meta-Llama-3-8B"),
            vec![
                "Llama3-GGUF-*.gguf".to_string(),
                "imatrix_Meta-Llama-3-8B.dat".to_string()
            ]
        );
    }

    #[test]
    fn test_upload_patterns_match_names_with_glob_characters() {
        let patterns = upload_allow_patterns("M[v2]", "acme/tiny?");
        let quant = glob::Pattern::new(&patterns[0]).unwrap();
        let matrix = glob::Pattern::new(&patterns[1]).unwrap();

        assert!(quant.matches(&create_model_name("M[v2]", "Q4_0")));
        assert!(!quant.matches("Mv-GGUF-Q4_0.gguf"));
        assert!(matrix.matches(&imatrix_file_name("acme/tiny?")));
        assert!(!matrix.matches("imatrix_tinyX.dat"));
    }
}
