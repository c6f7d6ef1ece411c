use bitbattle_shared::Language;

/// How a language's source file is named and turned into a running process
/// inside the container. Everything happens under the writable `/tmp`.
pub(crate) struct LanguageSpec {
    pub file_name: &'static str,
    pub compile: Option<&'static str>,
    pub run: &'static str,
}

pub(crate) fn spec(language: Language) -> LanguageSpec {
    match language {
        Language::JavaScript => LanguageSpec {
            file_name: "code.js",
            compile: None,
            run: "node code.js",
        },
        Language::Python => LanguageSpec {
            file_name: "code.py",
            compile: None,
            run: "python3 code.py",
        },
        // Submissions must declare `class Main`.
        Language::Java => LanguageSpec {
            file_name: "Main.java",
            compile: Some("javac Main.java"),
            run: "java Main",
        },
        Language::C => LanguageSpec {
            file_name: "code.c",
            compile: Some("gcc -O2 -o prog code.c -lm"),
            run: "./prog",
        },
        Language::Cpp => LanguageSpec {
            file_name: "code.cpp",
            compile: Some("g++ -O2 -o prog code.cpp"),
            run: "./prog",
        },
        Language::Rust => LanguageSpec {
            file_name: "code.rs",
            compile: Some("rustc -O -o prog code.rs"),
            run: "./prog",
        },
        Language::Go => LanguageSpec {
            file_name: "code.go",
            compile: Some("go build -o prog code.go"),
            run: "./prog",
        },
    }
}

/// Build the `sh -c` line executed inside the container. The source and the
/// test input travel in the `SOURCE` and `STDIN` environment variables;
/// `printf '%s'` writes them out verbatim, so arbitrary submission content
/// is safe to ship this way.
pub(crate) fn shell_script(language: Language) -> String {
    let spec = spec(language);
    let mut script = format!(
        "cd /tmp && printf '%s' \"$SOURCE\" > {file}",
        file = spec.file_name
    );
    if let Some(compile) = spec.compile {
        script.push_str(" && ");
        script.push_str(compile);
    }
    script.push_str(" && printf '%s' \"$STDIN\" | ");
    script.push_str(spec.run);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpreted_languages_have_no_compile_step() {
        assert!(spec(Language::Python).compile.is_none());
        assert!(spec(Language::JavaScript).compile.is_none());
        assert!(spec(Language::Rust).compile.is_some());
    }

    #[test]
    fn script_chains_compile_and_run() {
        let script = shell_script(Language::C);
        assert!(script.contains("> code.c"));
        assert!(script.contains("gcc -O2"));
        assert!(script.ends_with("| ./prog"));
    }

    #[test]
    fn script_feeds_stdin_to_interpreter() {
        let script = shell_script(Language::Python);
        assert!(script.ends_with("printf '%s' \"$STDIN\" | python3 code.py"));
    }
}
