#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is one prompt string.
pub(crate) const PROMPT_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "favorite",
        action: "toggle_favorite",
    },
    CommandSpec {
        command: "enhance",
        action: "enhance",
    },
    CommandSpec {
        command: "suggest",
        action: "suggest",
    },
    CommandSpec {
        command: "strength",
        action: "strength",
    },
];

pub(crate) const SINGLE_ID_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "show",
        action: "show_image",
    },
    CommandSpec {
        command: "mint",
        action: "mint",
    },
    CommandSpec {
        command: "export",
        action: "export",
    },
    CommandSpec {
        command: "template",
        action: "use_template",
    },
];

pub(crate) const MULTI_ID_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "delete",
    action: "delete_images",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "favorites",
        action: "favorites",
    },
    CommandSpec {
        command: "clear_history",
        action: "clear_history",
    },
    CommandSpec {
        command: "gallery",
        action: "gallery",
    },
    CommandSpec {
        command: "nfts",
        action: "nfts",
    },
    CommandSpec {
        command: "connect",
        action: "connect_wallet",
    },
    CommandSpec {
        command: "disconnect",
        action: "disconnect_wallet",
    },
    CommandSpec {
        command: "wallet",
        action: "wallet_status",
    },
    CommandSpec {
        command: "diagnose",
        action: "diagnose",
    },
];

pub(crate) const TEMPLATES_COMMAND: CommandSpec = CommandSpec {
    command: "templates",
    action: "list_templates",
};

pub(crate) const ADVANCE_COMMAND: CommandSpec = CommandSpec {
    command: "advance",
    action: "set_advance_mode",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/history",
    "/favorites",
    "/favorite <prompt>",
    "/clear_history",
    "/gallery",
    "/nfts",
    "/show <id>",
    "/delete <id...>",
    "/mint <id>",
    "/connect",
    "/disconnect",
    "/wallet",
    "/advance [on|off]",
    "/enhance <prompt>",
    "/suggest <prompt>",
    "/strength <prompt>",
    "/templates [search] [category=<name>]",
    "/template <id>",
    "/export <id>",
    "/diagnose",
];
