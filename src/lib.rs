pub mod billing {
    pub mod dedup;
    pub mod normalize;
    pub mod record;
    pub mod source;
    pub mod validate;
}

pub mod migration {
    pub mod checkpoint;
    pub mod driver;
    pub mod report;
    pub mod retry;
    pub mod subject;
}

pub mod cli {
    pub mod migrate_lifetime;
}

pub mod util {
    pub mod env;
}
