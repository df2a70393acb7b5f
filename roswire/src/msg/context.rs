//! Interface discovery and loading.

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use tracing::trace;

use super::{
    md5sum, package_resource_name, parse, ActionSpec, MsgSpec, SpecError, SrvSpec,
};

const PACKAGE_MANIFEST: &str = "package.xml";
const SECTION_SEPARATOR: &str = "---";

/// Loads and caches interface definitions found under a set of package
/// search roots.
///
/// Discovery follows the ROS package layout: every immediate child of a
/// search root that contains a `package.xml` is a package, and its
/// `msg/*.msg`, `srv/*.srv` and `action/*.action` files contribute entries
/// keyed `package/Name`. Message loads are cached by full name, so
/// repeated loads return the same spec and checksum computation touches
/// each definition once.
pub struct MsgContext {
    msg_paths: HashMap<String, PathBuf>,
    srv_paths: HashMap<String, PathBuf>,
    action_paths: HashMap<String, PathBuf>,
    registry: HashMap<String, MsgSpec>,
}

impl MsgContext {
    pub fn new(search_roots: &[PathBuf]) -> Self {
        MsgContext {
            msg_paths: find_interfaces(search_roots, "msg"),
            srv_paths: find_interfaces(search_roots, "srv"),
            action_paths: find_interfaces(search_roots, "action"),
            registry: HashMap::new(),
        }
    }

    /// Build a context from the colon-separated `ROS_PACKAGE_PATH`.
    pub fn from_env() -> Self {
        let roots: Vec<PathBuf> = env::var("ROS_PACKAGE_PATH")
            .unwrap_or_default()
            .split(':')
            .filter(|root| !root.is_empty())
            .map(PathBuf::from)
            .collect();

        Self::new(&roots)
    }

    /// Add or replace a spec in the registry.
    pub fn register(&mut self, spec: MsgSpec) {
        self.registry.insert(spec.full_name.clone(), spec);
    }

    /// Load a message by full name, from cache or from its discovered file.
    pub fn load_msg(&mut self, full_name: &str) -> Result<MsgSpec, SpecError> {
        if let Some(spec) = self.registry.get(full_name) {
            return Ok(spec.clone());
        }

        match self.msg_paths.get(full_name).cloned() {
            Some(path) => self.load_msg_from_file(&path, full_name),
            None => Err(SpecError::NotFound(full_name.to_string())),
        }
    }

    pub fn load_msg_from_file(
        &mut self,
        path: &Path,
        full_name: &str,
    ) -> Result<MsgSpec, SpecError> {
        let text = fs::read_to_string(path)?;
        self.load_msg_from_string(&text, full_name)
    }

    pub fn load_msg_from_string(
        &mut self,
        text: &str,
        full_name: &str,
    ) -> Result<MsgSpec, SpecError> {
        let (package, short_name) = package_resource_name(full_name)?;

        let mut fields = Vec::new();
        let mut constants = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            let clean = parse::strip_comment(line).trim();
            if clean.is_empty() {
                continue;
            }

            let syntax_error = |message: String| SpecError::Syntax {
                name: full_name.to_string(),
                line: lineno + 1,
                message,
            };

            if clean.contains('=') {
                constants.push(parse::parse_constant(line).map_err(syntax_error)?);
            } else {
                fields.push(parse::parse_field(clean, &package).map_err(syntax_error)?);
            }
        }

        let mut spec = MsgSpec {
            package,
            short_name,
            full_name: full_name.to_string(),
            text: text.to_string(),
            fields,
            constants,
            md5: String::new(),
        };

        spec.md5 = md5sum::compute_msg_md5(self, &spec)?;
        trace!("Loaded message: [name: \"{full_name}\", md5: {}]", spec.md5);

        self.register(spec.clone());
        Ok(spec)
    }

    /// Load a service by full name from its discovered file.
    pub fn load_srv(&mut self, full_name: &str) -> Result<SrvSpec, SpecError> {
        match self.srv_paths.get(full_name).cloned() {
            Some(path) => self.load_srv_from_file(&path, full_name),
            None => Err(SpecError::NotFound(full_name.to_string())),
        }
    }

    pub fn load_srv_from_file(
        &mut self,
        path: &Path,
        full_name: &str,
    ) -> Result<SrvSpec, SpecError> {
        let text = fs::read_to_string(path)?;
        self.load_srv_from_string(&text, full_name)
    }

    pub fn load_srv_from_string(
        &mut self,
        text: &str,
        full_name: &str,
    ) -> Result<SrvSpec, SpecError> {
        let (package, short_name) = package_resource_name(full_name)?;

        let sections = split_sections(text);
        let [request_text, response_text]: [String; 2] =
            sections.try_into().map_err(|_| SpecError::Syntax {
                name: full_name.to_string(),
                line: 0,
                message: format!("a service needs exactly one \"{SECTION_SEPARATOR}\" separator"),
            })?;

        let request = self.load_msg_from_string(&request_text, &format!("{full_name}Request"))?;
        let response = self.load_msg_from_string(&response_text, &format!("{full_name}Response"))?;
        let md5 = md5sum::compute_srv_md5(self, &request, &response)?;

        Ok(SrvSpec {
            package,
            short_name,
            full_name: full_name.to_string(),
            text: text.to_string(),
            md5,
            request,
            response,
        })
    }

    /// Load an action by full name from its discovered file.
    pub fn load_action(&mut self, full_name: &str) -> Result<ActionSpec, SpecError> {
        match self.action_paths.get(full_name).cloned() {
            Some(path) => self.load_action_from_file(&path, full_name),
            None => Err(SpecError::NotFound(full_name.to_string())),
        }
    }

    pub fn load_action_from_file(
        &mut self,
        path: &Path,
        full_name: &str,
    ) -> Result<ActionSpec, SpecError> {
        let text = fs::read_to_string(path)?;
        self.load_action_from_string(&text, full_name)
    }

    /// Load an action definition, synthesizing the three top-level
    /// actionlib messages that wrap its goal, result and feedback parts.
    pub fn load_action_from_string(
        &mut self,
        text: &str,
        full_name: &str,
    ) -> Result<ActionSpec, SpecError> {
        let (package, short_name) = package_resource_name(full_name)?;

        let sections = split_sections(text);
        let [goal_text, result_text, feedback_text]: [String; 3] =
            sections.try_into().map_err(|_| SpecError::Syntax {
                name: full_name.to_string(),
                line: 0,
                message: format!("an action needs exactly two \"{SECTION_SEPARATOR}\" separators"),
            })?;

        let goal = self.load_msg_from_string(&goal_text, &format!("{full_name}Goal"))?;
        let action_goal_text =
            format!("Header header\nactionlib_msgs/GoalID goal_id\n{full_name}Goal goal\n");
        let action_goal =
            self.load_msg_from_string(&action_goal_text, &format!("{full_name}ActionGoal"))?;

        let result = self.load_msg_from_string(&result_text, &format!("{full_name}Result"))?;
        let action_result_text =
            format!("Header header\nactionlib_msgs/GoalStatus status\n{full_name}Result result");
        let action_result =
            self.load_msg_from_string(&action_result_text, &format!("{full_name}ActionResult"))?;

        let feedback = self.load_msg_from_string(&feedback_text, &format!("{full_name}Feedback"))?;
        let action_feedback_text = format!(
            "Header header\nactionlib_msgs/GoalStatus status\n{full_name}Feedback feedback"
        );
        let action_feedback = self
            .load_msg_from_string(&action_feedback_text, &format!("{full_name}ActionFeedback"))?;

        let md5 =
            md5sum::compute_action_md5(self, &action_goal, &action_feedback, &action_result)?;

        Ok(ActionSpec {
            package,
            short_name,
            full_name: full_name.to_string(),
            text: text.to_string(),
            md5,
            goal,
            result,
            feedback,
            action_goal,
            action_result,
            action_feedback,
        })
    }

    /// Checksum text of an already-loaded spec, mostly useful for tests
    /// and debugging.
    pub fn md5_text(&mut self, spec: &MsgSpec) -> Result<String, SpecError> {
        md5sum::md5_text(self, spec)
    }
}

/// Split an interface text on lines containing only `---`.
fn split_sections(text: &str) -> Vec<String> {
    let mut sections = vec![Vec::new()];
    for line in text.lines() {
        if line.trim() == SECTION_SEPARATOR {
            sections.push(Vec::new());
        } else {
            sections.last_mut().unwrap().push(line);
        }
    }

    sections.into_iter().map(|lines| lines.join("\n")).collect()
}

fn is_ros_package(dir: &Path) -> bool {
    dir.join(PACKAGE_MANIFEST).is_file()
}

/// Scan each search root's immediate children for packages and index
/// their interface files. `kind` doubles as the subdirectory name and the
/// file extension (`msg`, `srv`, `action`).
fn find_interfaces(search_roots: &[PathBuf], kind: &str) -> HashMap<String, PathBuf> {
    let mut found = HashMap::new();

    for root in search_roots {
        let Ok(children) = fs::read_dir(root) else {
            continue;
        };

        for child in children.flatten() {
            let package_path = child.path();
            if !package_path.is_dir() || !is_ros_package(&package_path) {
                continue;
            }
            let Some(package_name) = package_path
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
            else {
                continue;
            };

            let Ok(files) = fs::read_dir(package_path.join(kind)) else {
                continue;
            };

            for file in files.flatten() {
                let path = file.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some(kind) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    found.insert(format!("{package_name}/{stem}"), path);
                }
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const HEADER_TEXT: &str = "uint32 seq\ntime stamp\nstring frame_id";

    fn empty_context() -> MsgContext {
        MsgContext::new(&[])
    }

    /// Build a throwaway package tree the discovery scan understands.
    fn fixture_tree(packages: &[(&str, &str, &[(&str, &str)])]) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for (package, kind, files) in packages {
            let package_dir = root.path().join(package);
            fs::create_dir_all(package_dir.join(kind)).unwrap();
            fs::write(package_dir.join(PACKAGE_MANIFEST), "<package/>").unwrap();
            for (name, text) in *files {
                fs::write(package_dir.join(kind).join(name), text).unwrap();
            }
        }
        root
    }

    #[test]
    fn string_message_has_the_canonical_md5() {
        let mut ctx = empty_context();
        let spec = ctx
            .load_msg_from_string("string data\n", "std_msgs/String")
            .unwrap();

        assert_eq!(ctx.md5_text(&spec).unwrap(), "string data");
        assert_eq!(spec.md5, "992ce8a1687cec8c8bd883ec73ca41d1");
    }

    #[test]
    fn header_message_has_the_canonical_md5() {
        let mut ctx = empty_context();
        let spec = ctx
            .load_msg_from_string(HEADER_TEXT, "std_msgs/Header")
            .unwrap();

        assert_eq!(spec.md5, "2176decaecbce78abc3b96ef049fabed");
    }

    #[test]
    fn md5_ignores_comments_and_blank_lines() {
        let mut ctx = empty_context();
        let plain = ctx
            .load_msg_from_string("string data\n", "std_msgs/String")
            .unwrap();

        let noisy = ctx
            .load_msg_from_string(
                "# leading comment\n\nstring data # trailing comment\n\n\n",
                "std_msgs/String",
            )
            .unwrap();

        assert_eq!(plain.md5, noisy.md5);
    }

    #[test]
    fn compound_fields_hash_their_dependency_digest() {
        let mut ctx = empty_context();
        ctx.load_msg_from_string(HEADER_TEXT, "std_msgs/Header")
            .unwrap();

        let spec = ctx
            .load_msg_from_string("Header header\nstring child_frame_id", "test_pkg/Stamped")
            .unwrap();

        assert_eq!(
            ctx.md5_text(&spec).unwrap(),
            "2176decaecbce78abc3b96ef049fabed header\nstring child_frame_id"
        );
    }

    #[test]
    fn repeated_loads_return_the_cached_spec() {
        let tree = fixture_tree(&[("std_msgs", "msg", &[("String.msg", "string data\n")])]);
        let mut ctx = MsgContext::new(&[tree.path().to_path_buf()]);

        let first = ctx.load_msg("std_msgs/String").unwrap();
        fs::remove_file(tree.path().join("std_msgs/msg/String.msg")).unwrap();
        let second = ctx.load_msg("std_msgs/String").unwrap();

        assert_eq!(first.md5, second.md5);
        assert_eq!(first.text, second.text);
    }

    #[test]
    fn unknown_names_are_not_found() {
        let mut ctx = empty_context();
        assert!(matches!(
            ctx.load_msg("nope/Missing"),
            Err(SpecError::NotFound(_))
        ));
    }

    #[test]
    fn directories_without_a_manifest_are_not_packages() {
        let root = tempfile::tempdir().unwrap();
        let not_a_package = root.path().join("not_a_package/msg");
        fs::create_dir_all(&not_a_package).unwrap();
        fs::write(not_a_package.join("Thing.msg"), "int32 x\n").unwrap();

        let mut ctx = MsgContext::new(&[root.path().to_path_buf()]);
        assert!(ctx.load_msg("not_a_package/Thing").is_err());
    }

    #[test]
    fn services_split_on_the_separator_line() {
        let mut ctx = empty_context();
        let spec = ctx
            .load_srv_from_string("int64 a\nint64 b\n---\nint64 sum\n", "test_pkg/AddTwoInts")
            .unwrap();

        assert_eq!(spec.request.fields.len(), 2);
        assert_eq!(spec.response.fields.len(), 1);
        // The canonical AddTwoInts digest from ros_tutorials.
        assert_eq!(spec.md5, "6a2e34150c00229791cc89ff309fff21");
    }

    #[test]
    fn services_with_the_wrong_section_count_are_rejected() {
        let mut ctx = empty_context();
        assert!(matches!(
            ctx.load_srv_from_string("int64 a\n", "test_pkg/Broken"),
            Err(SpecError::Syntax { .. })
        ));
        assert!(matches!(
            ctx.load_srv_from_string("---\n---\nint64 a\n", "test_pkg/Broken"),
            Err(SpecError::Syntax { .. })
        ));
    }

    fn action_fixture() -> tempfile::TempDir {
        fixture_tree(&[
            ("std_msgs", "msg", &[("Header.msg", HEADER_TEXT)]),
            (
                "actionlib_msgs",
                "msg",
                &[
                    ("GoalID.msg", "time stamp\nstring id\n"),
                    (
                        "GoalStatus.msg",
                        "GoalID goal_id\nuint8 status\nuint8 PENDING=0\nuint8 ACTIVE=1\nstring text\n",
                    ),
                ],
            ),
            (
                "actionlib_tutorials",
                "action",
                &[(
                    "Fibonacci.action",
                    "int32 order\n---\nint32[] sequence\n---\nint32[] sequence\n",
                )],
            ),
        ])
    }

    #[test]
    fn action_loading_is_deterministic() {
        let tree = action_fixture();

        let mut first_ctx = MsgContext::new(&[tree.path().to_path_buf()]);
        let first = first_ctx.load_action("actionlib_tutorials/Fibonacci").unwrap();

        let mut second_ctx = MsgContext::new(&[tree.path().to_path_buf()]);
        let second = second_ctx
            .load_action("actionlib_tutorials/Fibonacci")
            .unwrap();

        assert_eq!(first.md5, second.md5);
        assert_eq!(first.action_goal.md5, second.action_goal.md5);
        assert_eq!(first.action_result.md5, second.action_result.md5);
        assert_eq!(first.action_feedback.md5, second.action_feedback.md5);
    }

    #[test]
    fn action_md5_hashes_the_synthesized_texts() {
        use md5::{Digest, Md5};

        let tree = action_fixture();
        let mut ctx = MsgContext::new(&[tree.path().to_path_buf()]);
        let action = ctx.load_action("actionlib_tutorials/Fibonacci").unwrap();

        assert_eq!(
            action.action_goal.text,
            "Header header\nactionlib_msgs/GoalID goal_id\nactionlib_tutorials/FibonacciGoal goal\n"
        );

        let goal_text = ctx.md5_text(&action.action_goal).unwrap();
        let feedback_text = ctx.md5_text(&action.action_feedback).unwrap();
        let result_text = ctx.md5_text(&action.action_result).unwrap();

        let mut hasher = Md5::new();
        hasher.update(goal_text.as_bytes());
        hasher.update(feedback_text.as_bytes());
        hasher.update(result_text.as_bytes());

        assert_eq!(action.md5, format!("{:x}", hasher.finalize()));
    }

    #[test]
    fn actions_with_the_wrong_section_count_are_rejected() {
        let mut ctx = empty_context();
        assert!(matches!(
            ctx.load_action_from_string("int32 order\n---\nint32[] sequence\n", "test_pkg/Broken"),
            Err(SpecError::Syntax { .. })
        ));
    }
}
