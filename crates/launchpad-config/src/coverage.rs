// SPDX-License-Identifier: MIT OR Apache-2.0
//! Argument-vector rewriting for coverage runs.
//!
//! In coverage mode the service is not started directly; a coverage tool is
//! started instead and told which script to instrument:
//!
//! ```text
//! <cover_svc> <cover_args..> [-x <pattern>].. <svc.ext> [-- <args..>]
//! ```

/// Inputs of the coverage rewrite. Everything here has already been validated.
#[derive(Debug, Clone, Copy)]
pub struct CoverageWrap<'a> {
    /// Path of the coverage tool script.
    pub cover_svc: &'a str,
    /// Arguments passed to the coverage tool before anything else.
    pub cover_args: &'a [String],
    /// Glob patterns excluded from instrumentation, each emitted as `-x <pattern>`.
    pub cover_ignore: &'a [String],
    /// Extension appended to the service path when it does not carry one.
    pub script_ext: &'a str,
}

impl CoverageWrap<'_> {
    /// Build the full coverage argument vector for `svc` with the service's own `args`.
    ///
    /// The `--` separator is only emitted when `args` is non-empty.
    pub fn wrap(&self, svc: &str, args: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(
            2 + self.cover_args.len() + self.cover_ignore.len() * 2 + args.len(),
        );
        out.push(self.cover_svc.to_string());
        out.extend(self.cover_args.iter().cloned());
        for pattern in self.cover_ignore {
            out.push("-x".to_string());
            out.push(pattern.clone());
        }
        out.push(with_extension(svc, self.script_ext));
        if !args.is_empty() {
            out.push("--".to_string());
            out.extend(args.iter().cloned());
        }
        out
    }
}

/// Append `.ext` to `svc` unless it already ends with it.
pub fn with_extension(svc: &str, ext: &str) -> String {
    if ext.is_empty() {
        return svc.to_string();
    }
    let suffix = format!(".{ext}");
    if svc.ends_with(&suffix) {
        svc.to_string()
    } else {
        format!("{svc}{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wraps_without_service_args() {
        let cover_args = strings(&["cover", "--dir", "./coverage/e2e-test"]);
        let wrap = CoverageWrap {
            cover_svc: "./node_modules/istanbul/lib/cli",
            cover_args: &cover_args,
            cover_ignore: &[],
            script_ext: "js",
        };
        assert_eq!(
            wrap.wrap("test/fixture/svc", &[]),
            strings(&[
                "./node_modules/istanbul/lib/cli",
                "cover",
                "--dir",
                "./coverage/e2e-test",
                "test/fixture/svc.js",
            ])
        );
    }

    #[test]
    fn wraps_with_ignores_and_args() {
        let ignore = strings(&["lib/vendor/**", "gen/*"]);
        let wrap = CoverageWrap {
            cover_svc: "cov",
            cover_args: &[],
            cover_ignore: &ignore,
            script_ext: "js",
        };
        assert_eq!(
            wrap.wrap("svc.js", &strings(&["-arg1", "val1"])),
            strings(&[
                "cov",
                "-x",
                "lib/vendor/**",
                "-x",
                "gen/*",
                "svc.js",
                "--",
                "-arg1",
                "val1",
            ])
        );
    }

    #[test]
    fn extension_is_not_doubled() {
        assert_eq!(with_extension("a/b.js", "js"), "a/b.js");
        assert_eq!(with_extension("a/b", "js"), "a/b.js");
        assert_eq!(with_extension("a/b.jsx", "js"), "a/b.jsx.js");
        assert_eq!(with_extension("a/b", ""), "a/b");
    }
}
