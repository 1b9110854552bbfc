pub use bitcoin::io::{Error, ErrorKind, Read, Write};
