use thiserror::Error;

/// Errors surfaced by the household engines. None of these are fatal to the
/// process; the connection layer renders them into `ERR:` protocol lines.
#[derive(Debug, Error)]
pub enum HouseError {
    // Bad input shape, rejected before any write
    #[error("invalid input: {0}")]
    Validation(String),

    // Policy violations: rejected with no state change, caller should re-fetch
    #[error("appliance is already in use")]
    SlotTaken,
    #[error("only the current occupant may release this appliance")]
    NotOccupant,
    #[error("parking spot is already taken")]
    SpotTaken,
    #[error("you already occupy a parking spot")]
    AlreadyParked,
    #[error("the payer cannot vote on their own expense")]
    SelfVote,
    #[error("you already voted on this expense")]
    DuplicateVote,
    #[error("this expense has already been settled")]
    TerminalExpense,
    #[error("only the author may modify this message")]
    NotAuthor,

    // Identity errors
    #[error("incorrect answer")]
    WrongAnswer,
    #[error("role is already claimed by another housemate")]
    RoleTaken,
    #[error("this identity is already bound to a role")]
    AlreadyBound,
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("all household roles are taken, access denied")]
    NoRolesAvailable,
    #[error("identity not recognised, bind a role first")]
    UnknownMember,

    #[error("{0} not found")]
    NotFound(&'static str),

    // Storage or network failure; no automatic retry is performed
    #[error("storage error: {0}")]
    Transport(#[from] sqlx::Error),
}

pub type HouseResult<T> = Result<T, HouseError>;
