#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is kept as one argument.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "model",
    action: "set_model",
}];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "use",
        action: "set_active_image",
    },
    CommandSpec {
        command: "template",
        action: "set_template",
    },
    CommandSpec {
        command: "edit_template",
        action: "set_edit_template",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const EDIT_COMMAND: CommandSpec = CommandSpec {
    command: "edit",
    action: "edit",
};

pub(crate) const BATCH_COMMAND: CommandSpec = CommandSpec {
    command: "batch",
    action: "batch",
};

pub(crate) const REASONING_COMMAND: CommandSpec = CommandSpec {
    command: "reasoning",
    action: "set_reasoning",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/edit [x_top y_top x_bottom y_bottom] <request>",
    "/batch <count> <prompt>",
    "/use <path>",
    "/model <id>",
    "/reasoning on|off",
    "/template <path>",
    "/edit_template <path>",
    "/status",
    "/help",
    "/quit",
];
