//! Output path templates for built archives.
//!
//! Templates use [upon] syntax with two variables:
//!
//! | Variable | Description                                               |
//! |----------|-----------------------------------------------------------|
//! | `name`   | Name of the archive definition                            |
//! | `dir`    | Directory the definition lives in, relative to the root   |
//!
//! Two formatters are registered on top of upon's defaults: `slug` and
//! `underscores` (every `/` becomes `_`, flattening a directory into a
//! single path segment).
//!
//! The default template, `{{ dir|underscores }}/{{ name }}`, gets a `.run`
//! extension. Explicit templates are used verbatim.
//!
//! ```
//! use sfx_makeself::OutputPath;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let default = OutputPath::default_template()?;
//! assert_eq!(default.generate("installer", "deploy/linux")?, std::path::PathBuf::from("deploy_linux/installer.run"));
//!
//! let explicit: OutputPath = "dist/{{ name|slug }}.sh".parse()?;
//! assert_eq!(explicit.generate("My Installer", "")?, std::path::PathBuf::from("dist/my-installer.sh"));
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use sfx_store::validate_path;
use std::path::PathBuf;
use std::str::FromStr;
use upon::{Engine, Template};

pub const DEFAULT_TEMPLATE: &str = "{{ dir|underscores }}/{{ name }}";
pub const DEFAULT_EXTENSION: &str = "run";

/// A compiled output path template.
pub struct OutputPath {
    engine: Engine<'static>,
    template: Template<'static>,
    extension: Option<&'static str>,
}
impl FromStr for OutputPath {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        // Compile the template early so we can fail-fast in construction.
        let template = engine.compile(s.to_string()).or_raise(|| ErrorKind::Template)?;
        Ok(Self { engine, template, extension: None })
    }
}
impl OutputPath {
    pub fn default_template() -> Result<Self> {
        let mut path: Self = DEFAULT_TEMPLATE.parse()?;
        path.extension = Some(DEFAULT_EXTENSION);
        Ok(path)
    }

    /// Resolves an optional explicit template, falling back to the default.
    pub fn new(template: Option<&str>) -> Result<Self> {
        match template {
            Some(template) => template.parse(),
            None => Self::default_template(),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn generate(&self, name: &str, dir: &str) -> Result<PathBuf> {
        let rendered = self
            .template
            .render(&self.engine, upon::value! { name: name, dir: dir })
            .to_string()
            .or_raise(|| ErrorKind::Template)?;
        let path = normalize(&rendered)?;
        Ok(match self.extension {
            Some(ext) => format!("{path}.{ext}").into(),
            None => path.into(),
        })
    }
}

/// Trims every segment and drops empty ones, so an empty `dir` does not turn
/// the path absolute. The result must stay inside the output root.
fn normalize(path: &str) -> Result<String> {
    let joined = path.split('/').map(str::trim).filter(|s| !s.is_empty()).collect::<Vec<_>>().join("/");
    if joined.is_empty() {
        exn::bail!(ErrorKind::Template);
    }
    let validated = validate_path(&joined).or_raise(|| ErrorKind::Template)?;
    Ok(validated.display().to_string())
}

mod addons {
    use rslug::slugify;
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    /// Strips quotation marks first, so `"hello"` does not become `-hello-`.
    fn slug_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => {
                let marks = ['\'', '"', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '`'];
                let stripped: String = s.chars().filter(|c| !marks.contains(c)).collect();
                write!(f, "{}", slugify!(&stripped))?
            },
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    fn underscores_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => write!(f, "{}", s.trim_matches('/').replace('/', "_"))?,
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("slug", slug_formatter);
        engine.add_formatter("underscores", underscores_formatter);
    }
}
