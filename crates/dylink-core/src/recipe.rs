//! Recipes: the toolchain-specific inputs of a build.
//!
//! A [`Recipe`] owns every command string that reaches a worker shell. The
//! build stages only decide which command goes to which worker and whether
//! it succeeded.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::platform::{self, Shell, ShellFlavor};

/// A source file to compile, relative to the build directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "SourceSpec")]
pub struct SourceFile {
    /// Path of the source file
    pub path: PathBuf,
}

/// Accepted spellings of a source entry in a recipe file.
#[derive(Deserialize)]
#[serde(untagged)]
enum SourceSpec {
    Path(PathBuf),
    Detailed { path: PathBuf },
}

impl From<SourceSpec> for SourceFile {
    fn from(spec: SourceSpec) -> Self {
        match spec {
            SourceSpec::Path(path) | SourceSpec::Detailed { path } => Self { path },
        }
    }
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Object file produced from this source: same path, `object_ext`
    /// replacing the source extension.
    pub fn object_path(&self, object_ext: &str) -> PathBuf {
        self.path.with_extension(object_ext.trim_start_matches('.'))
    }
}

/// Toolchain configuration supplied by the caller.
pub trait Recipe {
    /// Shell that runs every worker session.
    fn shell(&self) -> &Shell;

    /// Command run once at the start of every session (environment setup).
    fn init_command(&self) -> &str;

    /// Command compiling one source into its object file.
    fn object_command(&self, source: &SourceFile) -> String;

    /// Command packaging `objects` into the `target` shared library.
    fn library_command(&self, objects: &[PathBuf], target: &str) -> String;

    /// Base name of the shared library.
    fn target(&self) -> &str;

    /// Object file extension, including the dot.
    fn object_ext(&self) -> &str;

    /// Shared library extension, including the dot.
    fn library_ext(&self) -> &str;

    /// Sources in build order.
    fn sources(&self) -> &[SourceFile];

    /// Object files for all sources, in source order.
    fn objects(&self) -> Vec<PathBuf> {
        self.sources()
            .iter()
            .map(|source| source.object_path(self.object_ext()))
            .collect()
    }

    /// File name of the shared library.
    fn library_file_name(&self) -> String {
        format!("{}{}", self.target(), self.library_ext())
    }
}

/// Check that a recipe can drive a build at all.
pub fn validate(recipe: &(impl Recipe + ?Sized)) -> Result<()> {
    if recipe.target().trim().is_empty() {
        return Err(Error::InvalidRecipe("target name is empty".to_string()));
    }
    if recipe.shell().program.as_os_str().is_empty() {
        return Err(Error::InvalidRecipe("shell program is empty".to_string()));
    }
    if recipe.library_ext().is_empty() {
        return Err(Error::InvalidRecipe(
            "shared library extension is empty".to_string(),
        ));
    }
    Ok(())
}

/// A recipe built from command templates, loadable from JSON.
///
/// Templates may use these placeholders:
///
/// | placeholder     | value                                  |
/// |-----------------|----------------------------------------|
/// | `{source}`      | source path (object command only)      |
/// | `{object}`      | object path (object command only)      |
/// | `{objects}`     | space-separated object paths           |
/// | `{target}`      | target base name                       |
/// | `{object_ext}`  | object extension                       |
/// | `{library_ext}` | shared library extension               |
/// | `{library}`     | `{target}{library_ext}`                |
///
/// Paths substituted for `{source}`, `{object}` and `{objects}` are quoted
/// for the host shell when they contain anything beyond plain path
/// characters, so `my file.c` stays one argument.
///
/// ```json
/// {
///   "object_command": "gcc -c -O3 -fPIC {source} -o {object}",
///   "library_command": "gcc -shared {objects} -o {library}",
///   "target": "predictor",
///   "sources": ["main.c", "tu0.c", {"path": "tu1.c"}]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateRecipe {
    /// Shell command line; host default when omitted
    #[serde(default)]
    pub shell: Shell,

    /// Session setup command
    #[serde(default)]
    pub init_command: String,

    /// Template for compiling one source
    pub object_command: String,

    /// Template for linking all objects
    pub library_command: String,

    /// Library base name
    pub target: String,

    /// Object extension
    #[serde(default = "default_object_ext")]
    pub object_ext: String,

    /// Shared library extension
    #[serde(default = "default_library_ext")]
    pub library_ext: String,

    /// Sources to compile
    pub sources: Vec<SourceFile>,
}

fn shell_path(path: &Path) -> String {
    let path = path.display().to_string();
    ShellFlavor::host().quote_if_needed(&path).into_owned()
}

fn default_object_ext() -> String {
    let ext = if cfg!(windows) { ".obj" } else { ".o" };
    ext.to_string()
}

fn default_library_ext() -> String {
    platform::library_extension().to_string()
}

impl TemplateRecipe {
    /// Parse a recipe from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a recipe file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Substitute the placeholders shared by both templates.
    fn render(&self, template: &str, objects: &str, target: &str) -> String {
        template
            .replace("{objects}", objects)
            .replace("{target}", target)
            .replace("{object_ext}", &self.object_ext)
            .replace("{library_ext}", &self.library_ext)
            .replace("{library}", &format!("{target}{}", self.library_ext))
    }
}

impl Recipe for TemplateRecipe {
    fn shell(&self) -> &Shell {
        &self.shell
    }

    fn init_command(&self) -> &str {
        &self.init_command
    }

    fn object_command(&self, source: &SourceFile) -> String {
        let object = source.object_path(&self.object_ext);
        let command = self
            .object_command
            .replace("{source}", &shell_path(&source.path))
            .replace("{object}", &shell_path(&object));
        self.render(&command, "", &self.target)
    }

    fn library_command(&self, objects: &[PathBuf], target: &str) -> String {
        let objects = objects
            .iter()
            .map(|o| shell_path(o))
            .collect::<Vec<_>>()
            .join(" ");
        self.render(&self.library_command, &objects, target)
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn object_ext(&self) -> &str {
        &self.object_ext
    }

    fn library_ext(&self) -> &str {
        &self.library_ext
    }

    fn sources(&self) -> &[SourceFile] {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gcc_recipe() -> TemplateRecipe {
        TemplateRecipe::from_json(
            r#"{
                "shell": "/bin/sh",
                "object_command": "gcc -c -fPIC {source} -o {object}",
                "library_command": "gcc -shared {objects} -o {library}",
                "target": "predictor",
                "object_ext": ".o",
                "library_ext": ".so",
                "sources": ["main.c", {"path": "tu0.c"}]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_object_path() {
        let source = SourceFile::new("gen/tu3.c");
        assert_eq!(source.object_path(".o"), PathBuf::from("gen/tu3.o"));
        assert_eq!(source.object_path("obj"), PathBuf::from("gen/tu3.obj"));
    }

    #[test]
    fn test_parse_sources_both_spellings() {
        let recipe = gcc_recipe();
        assert_eq!(
            recipe.sources(),
            &[SourceFile::new("main.c"), SourceFile::new("tu0.c")]
        );
        assert_eq!(recipe.shell().program, PathBuf::from("/bin/sh"));
    }

    #[test]
    fn test_object_command() {
        let recipe = gcc_recipe();
        assert_eq!(
            recipe.object_command(&SourceFile::new("tu0.c")),
            "gcc -c -fPIC tu0.c -o tu0.o"
        );
    }

    #[test]
    fn test_library_command() {
        let recipe = gcc_recipe();
        let objects = recipe.objects();
        assert_eq!(
            recipe.library_command(&objects, recipe.target()),
            "gcc -shared main.o tu0.o -o predictor.so"
        );
        assert_eq!(recipe.library_file_name(), "predictor.so");
    }

    #[cfg(unix)]
    #[test]
    fn test_paths_with_spaces_are_quoted() {
        let recipe = gcc_recipe();
        assert_eq!(
            recipe.object_command(&SourceFile::new("my kernels/tu 0.c")),
            "gcc -c -fPIC 'my kernels/tu 0.c' -o 'my kernels/tu 0.o'"
        );

        let objects = vec![PathBuf::from("main.o"), PathBuf::from("tu 0.o")];
        assert_eq!(
            recipe.library_command(&objects, recipe.target()),
            "gcc -shared main.o 'tu 0.o' -o predictor.so"
        );
    }

    #[test]
    fn test_defaults() {
        let recipe = TemplateRecipe::from_json(
            r#"{
                "object_command": "cc -c {source}",
                "library_command": "cc -shared {objects}",
                "target": "lib",
                "sources": []
            }"#,
        )
        .unwrap();

        assert!(recipe.init_command().is_empty());
        assert_eq!(recipe.library_ext(), platform::library_extension());
        assert!(!recipe.shell().program.as_os_str().is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = TemplateRecipe::from_json(
            r#"{
                "object_command": "cc",
                "library_command": "cc",
                "target": "lib",
                "sources": [],
                "nthread": 4
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::RecipeFormat(_)));
    }

    #[test]
    fn test_validate() {
        let mut recipe = gcc_recipe();
        assert!(validate(&recipe).is_ok());

        recipe.target = "  ".to_string();
        assert!(matches!(validate(&recipe), Err(Error::InvalidRecipe(_))));

        let mut recipe = gcc_recipe();
        recipe.library_ext.clear();
        assert!(matches!(validate(&recipe), Err(Error::InvalidRecipe(_))));
    }
}
