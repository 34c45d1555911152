//! Task definitions registered into the graph.

use crate::core::environment::Environment;

/// In-process actions the orchestrator performs itself on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// Ticket document and feature test must exist for the branch.
    CheckTickets,
    /// Manifest version must be untagged and fit the branch.
    CheckVersion,
    /// Tag the manifest version and push the tag to `origin`.
    PushTags,
    /// Remove build output and tool caches.
    Clean,
}

/// What a task does when it is not already satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Aggregates dependencies, does nothing itself.
    Group,
    /// Commands run in order in the task's environment; the first failure stops the task.
    Commands(Vec<Vec<String>>),
    /// `docker build` for the given environment's image.
    BuildImage(Environment),
    Builtin(Builtin),
}

/// When the executor may skip a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Satisfaction {
    Never,
    /// The image exists and its content stamp matches the current inputs.
    ImageUpToDate(Environment),
    /// The task last passed with the same input files, commands and image.
    InputsUnchanged,
}

/// Extra host resources a containerized task needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Access {
    /// Mount the host docker socket (Docker-outside-Docker).
    pub docker_socket: bool,
    /// Mount ssh keys and git config read-only.
    pub git_credentials: bool,
}

impl Access {
    pub const NONE: Access = Access {
        docker_socket: false,
        git_credentials: false,
    };
    pub const ALL: Access = Access {
        docker_socket: true,
        git_credentials: true,
    };
}

/// A named unit of work. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub environment: Environment,
    pub action: Action,
    pub satisfied: Satisfaction,
    /// Files and directories, relative to the project root, whose contents
    /// decide [`Satisfaction::InputsUnchanged`].
    pub inputs: Vec<String>,
    pub access: Access,
}

impl Task {
    pub fn new(name: impl Into<String>, environment: Environment) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            dependencies: Vec::new(),
            environment,
            action: Action::Group,
            satisfied: Satisfaction::Never,
            inputs: Vec::new(),
            access: Access::NONE,
        }
    }

    /// A dependency-only goal that runs on the host.
    pub fn group<I, S>(name: impl Into<String>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, Environment::Host).depends_on(dependencies)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add dependencies, ignoring repeats.
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in dependencies {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    pub fn run(mut self, argv: &[&str]) -> Self {
        let command: Vec<String> = argv.iter().map(|arg| arg.to_string()).collect();
        match &mut self.action {
            Action::Commands(commands) => commands.push(command),
            _ => self.action = Action::Commands(vec![command]),
        }
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn builds_image(mut self, target: Environment) -> Self {
        self.action = Action::BuildImage(target);
        self.satisfied = Satisfaction::ImageUpToDate(target);
        self
    }

    /// Skip the task while it has passed with these inputs unchanged.
    pub fn cached_on<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self.satisfied = Satisfaction::InputsUnchanged;
        self
    }

    pub fn with_docker_socket(mut self) -> Self {
        self.access.docker_socket = true;
        self
    }

    pub fn with_git_credentials(mut self) -> Self {
        self.access.git_credentials = true;
        self
    }
}
