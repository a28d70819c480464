pub mod destination;
pub mod neighbour;
pub mod packet;
pub mod route;
pub mod topology;
pub mod vector;
